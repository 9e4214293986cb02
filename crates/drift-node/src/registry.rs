//! Identity registry adapters.

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;

use drift_core::error::RegistryError;
use drift_core::traits::Registry;
use drift_core::types::Address;

use crate::config::RegistryConfig;

/// Registers every address.
#[derive(Debug, Clone, Copy, Default)]
pub struct OpenRegistry;

#[async_trait]
impl Registry for OpenRegistry {
    async fn is_registered(&self, _address: &Address) -> Result<bool, RegistryError> {
        Ok(true)
    }
}

/// Registers a fixed set of addresses.
#[derive(Debug, Clone, Default)]
pub struct AllowListRegistry {
    addresses: BTreeSet<Address>,
}

impl AllowListRegistry {
    pub fn new<I: IntoIterator<Item = Address>>(addresses: I) -> Self {
        Self { addresses: addresses.into_iter().collect() }
    }

    pub fn len(&self) -> usize {
        self.addresses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.addresses.is_empty()
    }
}

#[async_trait]
impl Registry for AllowListRegistry {
    async fn is_registered(&self, address: &Address) -> Result<bool, RegistryError> {
        Ok(self.addresses.contains(address))
    }
}

/// The registry described by `config`.
pub fn from_config(config: &RegistryConfig) -> Arc<dyn Registry> {
    match config {
        RegistryConfig::Open => Arc::new(OpenRegistry),
        RegistryConfig::AllowList { addresses } => {
            Arc::new(AllowListRegistry::new(addresses.iter().copied()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn open_registry_accepts_everyone() {
        assert!(OpenRegistry.is_registered(&Address([9; 32])).await.unwrap());
    }

    #[tokio::test]
    async fn allow_list_accepts_only_listed() {
        let registry = AllowListRegistry::new([Address([1; 32]), Address([1; 32])]);
        assert_eq!(registry.len(), 1);
        assert!(registry.is_registered(&Address([1; 32])).await.unwrap());
        assert!(!registry.is_registered(&Address([2; 32])).await.unwrap());
    }

    #[tokio::test]
    async fn from_config_builds_matching_registry() {
        let open = from_config(&RegistryConfig::Open);
        assert!(open.is_registered(&Address([3; 32])).await.unwrap());

        let listed = from_config(&RegistryConfig::AllowList { addresses: vec![Address([4; 32])] });
        assert!(listed.is_registered(&Address([4; 32])).await.unwrap());
        assert!(!listed.is_registered(&Address([3; 32])).await.unwrap());
    }
}
