//! API Module
//!
//! REST control-plane API over the position registry.

pub mod rest;
pub mod server;

pub use rest::*;
pub use server::*;
