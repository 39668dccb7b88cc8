//! Error types for the Position Registry
//!
//! Provides structured error types for the registry core, the address book,
//! configuration loading and the control-plane API.

use thiserror::Error;

/// Unified error type for the registry
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Internal Errors
    // =========================================================================
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    // =========================================================================
    // Position Table Errors
    // =========================================================================
    #[error("Invalid index {index}: capacity is {capacity}")]
    IndexOutOfRange { index: usize, capacity: usize },

    #[error("Node with index {index} is disabled")]
    NodeDisabled { index: usize },

    #[error("Position for node {index} has a non-finite coordinate")]
    NonFinitePosition { index: usize },

    // =========================================================================
    // Address Errors
    // =========================================================================
    #[error("Node with address {address} is not found")]
    AddressNotFound { address: String },

    #[error("Address {address} conflicts with an existing mapping for index {index}")]
    AddressAlreadyMapped { address: String, index: usize },

    #[error("Registry has no address resolver")]
    NoAddressResolver,

    // =========================================================================
    // Parse Errors
    // =========================================================================
    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("YAML parse error: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    // =========================================================================
    // Metrics Errors
    // =========================================================================
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    // =========================================================================
    // IO Errors
    // =========================================================================
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Check if this error may clear up without the caller changing its input.
    ///
    /// Only a disabled node qualifies: membership churns during a run, so the
    /// same call can succeed once the node is enabled again.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::NodeDisabled { .. })
    }

    /// Check if this error was caused by the arguments the caller passed
    pub fn is_caller_error(&self) -> bool {
        matches!(
            self,
            Error::IndexOutOfRange { .. }
                | Error::NonFinitePosition { .. }
                | Error::AddressNotFound { .. }
                | Error::AddressAlreadyMapped { .. }
                | Error::NoAddressResolver
        )
    }

    /// Stable machine-readable identifier for this error
    pub fn code(&self) -> &'static str {
        match self {
            Error::Internal(_) => "internal",
            Error::Configuration(_) => "configuration",
            Error::IndexOutOfRange { .. } => "index_out_of_range",
            Error::NodeDisabled { .. } => "node_disabled",
            Error::NonFinitePosition { .. } => "non_finite_position",
            Error::AddressNotFound { .. } => "address_not_found",
            Error::AddressAlreadyMapped { .. } => "address_already_mapped",
            Error::NoAddressResolver => "no_address_resolver",
            Error::JsonParse(_) => "json_parse",
            Error::YamlParse(_) => "yaml_parse",
            Error::Metrics(_) => "metrics",
            Error::Io(_) => "io",
        }
    }
}

/// Result type alias for the registry
pub type Result<T> = std::result::Result<T, Error>;
