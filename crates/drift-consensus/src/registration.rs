//! Registry queries bounded by a timeout.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;
use tracing::warn;

use drift_core::error::RegistryError;
use drift_core::traits::Registry;
use drift_core::types::Address;

/// Ask the registry about one address, giving up after `timeout`.
pub async fn query(
    registry: &dyn Registry,
    address: &Address,
    timeout: Duration,
) -> Result<bool, RegistryError> {
    tokio::time::timeout(timeout, registry.is_registered(address))
        .await
        .unwrap_or(Err(RegistryError::Timeout))
}

/// Registry answers for a set of addresses, queried concurrently.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistryAnswers(BTreeMap<Address, Result<bool, RegistryError>>);

impl RegistryAnswers {
    pub async fn collect<I>(registry: &Arc<dyn Registry>, addresses: I, timeout: Duration) -> Self
    where
        I: IntoIterator<Item = Address>,
    {
        let mut tasks = JoinSet::new();
        for address in addresses {
            let registry = Arc::clone(registry);
            tasks.spawn(async move {
                let answer = query(registry.as_ref(), &address, timeout).await;
                (address, answer)
            });
        }

        let mut answers = BTreeMap::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((address, answer)) => {
                    answers.insert(address, answer);
                }
                Err(e) => warn!("registry query task failed: {e}"),
            }
        }
        Self(answers)
    }

    /// The answer for `address`; an address that was never answered counts
    /// as unavailable.
    pub fn get(&self, address: &Address) -> Result<bool, RegistryError> {
        self.0
            .get(address)
            .cloned()
            .unwrap_or_else(|| Err(RegistryError::Unavailable(format!("no answer for {address}"))))
    }

    pub fn approves(&self, address: &Address) -> bool {
        matches!(self.get(address), Ok(true))
    }

    pub fn rejects(&self, address: &Address) -> bool {
        matches!(self.get(address), Ok(false))
    }

    /// First failed query, in address order.
    pub fn first_error(&self) -> Option<(&Address, &RegistryError)> {
        self.0
            .iter()
            .find_map(|(address, answer)| answer.as_ref().err().map(|e| (address, e)))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashSet;

    struct SetRegistry(HashSet<Address>);

    #[async_trait]
    impl Registry for SetRegistry {
        async fn is_registered(&self, address: &Address) -> Result<bool, RegistryError> {
            if address.0[0] == 0xFF {
                return Err(RegistryError::Unavailable("down".into()));
            }
            Ok(self.0.contains(address))
        }
    }

    struct SlowRegistry;

    #[async_trait]
    impl Registry for SlowRegistry {
        async fn is_registered(&self, _: &Address) -> Result<bool, RegistryError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(true)
        }
    }

    fn registry() -> Arc<dyn Registry> {
        Arc::new(SetRegistry([Address([1; 32])].into_iter().collect()))
    }

    #[tokio::test]
    async fn answers_are_collected_per_address() {
        let addresses = [Address([1; 32]), Address([2; 32]), Address([0xFF; 32])];
        let answers = RegistryAnswers::collect(&registry(), addresses, Duration::from_secs(1)).await;
        assert_eq!(answers.len(), 3);
        assert!(answers.approves(&Address([1; 32])));
        assert!(answers.rejects(&Address([2; 32])));
        assert!(!answers.approves(&Address([0xFF; 32])));
        assert!(!answers.rejects(&Address([0xFF; 32])));
        assert_eq!(answers.first_error().map(|(a, _)| *a), Some(Address([0xFF; 32])));
    }

    #[tokio::test]
    async fn unknown_address_is_unavailable() {
        let answers = RegistryAnswers::default();
        assert!(answers.is_empty());
        assert!(matches!(answers.get(&Address([3; 32])), Err(RegistryError::Unavailable(_))));
    }

    #[tokio::test]
    async fn slow_registry_times_out() {
        let answer = query(&SlowRegistry, &Address([1; 32]), Duration::from_millis(10)).await;
        assert_eq!(answer, Err(RegistryError::Timeout));
    }
}
