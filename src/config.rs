//! Registry Configuration
//!
//! Describes the simulated network the registry is built for: the node
//! addresses, where each node starts, which nodes start enabled, and the
//! names of the external mobility and link-quality engines.
//!
//! Loaded from JSON, or YAML when the file ends in `.yaml`/`.yml`.

use crate::error::{Error, Result};
use crate::registry::{
    AddressBook, Position, PositionRegistry, DEFAULT_NOTIFY_QUEUE_CAPACITY,
    MAX_NOTIFY_QUEUE_CAPACITY,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// Default control-plane API address
pub const DEFAULT_LISTEN_ADDRESS: &str = "0.0.0.0:8090";

// =============================================================================
// Node Configuration
// =============================================================================

/// A configured node; its index is its position in [`RegistryConfig::nodes`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Hardware address used for address-based operations
    pub address: String,
    /// Start position, origin if absent
    #[serde(default)]
    pub position: Option<Position>,
    /// Whether the node participates from the start
    #[serde(default)]
    pub enabled: bool,
}

// =============================================================================
// Registry Configuration
// =============================================================================

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Control-plane API bind address
    pub listen_address: String,
    /// Address range of the emulated network, passed through to the
    /// engines unchanged
    pub network: Option<String>,
    /// Slot count; defaults to the number of configured nodes
    pub capacity: Option<usize>,
    /// Queue size for subscriptions the binary creates
    pub notify_queue_capacity: usize,
    pub nodes: Vec<NodeConfig>,
    /// Name of the external mobility plugin
    pub mobility_manager: Option<String>,
    pub mobility_manager_parameters: serde_json::Map<String, serde_json::Value>,
    /// Name of the external link-quality engine
    pub link_model: Option<String>,
    pub link_model_parameters: serde_json::Map<String, serde_json::Value>,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            listen_address: DEFAULT_LISTEN_ADDRESS.to_string(),
            network: None,
            capacity: None,
            notify_queue_capacity: DEFAULT_NOTIFY_QUEUE_CAPACITY,
            nodes: Vec::new(),
            mobility_manager: None,
            mobility_manager_parameters: serde_json::Map::new(),
            link_model: None,
            link_model_parameters: serde_json::Map::new(),
        }
    }
}

impl RegistryConfig {
    /// Load and validate a configuration file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)?;

        let is_yaml = matches!(
            path.extension().and_then(|ext| ext.to_str()),
            Some("yaml") | Some("yml")
        );
        let config: Self = if is_yaml {
            serde_yaml::from_str(&contents)?
        } else {
            serde_json::from_str(&contents)?
        };

        config.validate()?;
        Ok(config)
    }

    /// Slot count the registry is built with
    pub fn effective_capacity(&self) -> usize {
        self.capacity.unwrap_or(self.nodes.len())
    }

    /// Parsed [`listen_address`](Self::listen_address)
    pub fn listen_addr(&self) -> Result<SocketAddr> {
        self.listen_address.parse().map_err(|e| {
            Error::Configuration(format!(
                "Invalid listen address {}: {}",
                self.listen_address, e
            ))
        })
    }

    /// Check the configuration for inconsistencies
    pub fn validate(&self) -> Result<()> {
        self.listen_addr()?;

        if self.notify_queue_capacity == 0 {
            return Err(Error::Configuration(
                "notify_queue_capacity must be greater than zero".into(),
            ));
        }
        if self.notify_queue_capacity > MAX_NOTIFY_QUEUE_CAPACITY {
            return Err(Error::Configuration(format!(
                "notify_queue_capacity {} exceeds the maximum of {}",
                self.notify_queue_capacity, MAX_NOTIFY_QUEUE_CAPACITY
            )));
        }

        let capacity = self.effective_capacity();
        if capacity < self.nodes.len() {
            return Err(Error::Configuration(format!(
                "capacity {} is smaller than the {} configured nodes",
                capacity,
                self.nodes.len()
            )));
        }

        let mut seen = HashSet::new();
        for (index, node) in self.nodes.iter().enumerate() {
            if node.address.trim().is_empty() {
                return Err(Error::Configuration(format!(
                    "node {} has an empty address",
                    index
                )));
            }
            if !seen.insert(node.address.as_str()) {
                return Err(Error::Configuration(format!(
                    "duplicate node address: {}",
                    node.address
                )));
            }
            if let Some(position) = &node.position {
                if !position.is_finite() {
                    return Err(Error::Configuration(format!(
                        "node {} ({}) has a non-finite start position",
                        index, node.address
                    )));
                }
            }
        }

        Ok(())
    }

    /// Build the address book and the registry, seed start positions and
    /// enable the nodes marked enabled.
    pub fn build(&self) -> Result<(Arc<PositionRegistry>, Arc<AddressBook>)> {
        self.validate()?;

        let capacity = self.effective_capacity();
        let addresses = Arc::new(AddressBook::new(capacity));
        for (index, node) in self.nodes.iter().enumerate() {
            addresses.insert(node.address.clone(), index)?;
        }

        let registry = PositionRegistry::with_resolver(capacity, addresses.clone());
        for (index, node) in self.nodes.iter().enumerate() {
            if let Some(position) = &node.position {
                registry.seed_position(index, position)?;
            }
        }
        for (index, node) in self.nodes.iter().enumerate() {
            if node.enabled {
                registry.enable(index)?;
            }
        }

        info!(
            capacity,
            nodes = self.nodes.len(),
            enabled = registry.enabled().len(),
            "Position registry built from configuration"
        );

        Ok((registry, addresses))
    }
}
