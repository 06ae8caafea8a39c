use crate::{
    address::AccountAddress,
    endpoints::Endpoint,
    error::SyncError,
    ledger::LedgerTransport,
};
use std::{
    collections::HashMap,
    sync::Mutex,
};

/// creator -> resolved game address. Entries never expire: a game's resource
/// account does not move once created.
#[derive(Debug, Default)]
pub struct AddressCache {
    entries: Mutex<HashMap<AccountAddress, AccountAddress>>,
}

impl AddressCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, creator: &AccountAddress) -> Option<AccountAddress> {
        self.lock().get(creator).copied()
    }

    pub fn insert(&self, creator: AccountAddress, resolved: AccountAddress) {
        self.lock().insert(creator, resolved);
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<AccountAddress, AccountAddress>> {
        // a poisoned map still holds valid addresses
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Finds the account holding the live game for `creator`.
pub struct ResourceResolver<'a, T> {
    transport: &'a T,
    cache: &'a AddressCache,
}

impl<'a, T: LedgerTransport> ResourceResolver<'a, T> {
    pub fn new(transport: &'a T, cache: &'a AddressCache) -> Self {
        Self { transport, cache }
    }

    pub async fn resolve(
        &self,
        endpoint: &Endpoint,
        creator: &AccountAddress,
    ) -> Result<AccountAddress, SyncError> {
        if let Some(resolved) = self.cache.get(creator) {
            tracing::trace!(%creator, %resolved, "resolved address from cache");
            return Ok(resolved);
        }
        let record = self
            .transport
            .resolve_indirection(endpoint, creator)
            .await
            .map_err(|err| {
                SyncError::from_transport(err, endpoint, || {
                    SyncError::ResolutionNotFound { creator: *creator }
                })
            })?;
        tracing::debug!(
            %creator,
            resolved = %record.resource_address,
            "resolved game resource address"
        );
        self.cache.insert(*creator, record.resource_address);
        Ok(record.resource_address)
    }
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]
    use super::*;
    use crate::{
        error::LedgerError,
        test_helpers::{
            FakeLedger,
            addr,
        },
    };

    #[tokio::test]
    async fn resolve__caches_successful_lookups() {
        // given
        let ledger = FakeLedger::new();
        ledger.register_game(addr("0xc"), addr("0xee"));
        let cache = AddressCache::new();
        let endpoint = Endpoint::new("http://a");
        let resolver = ResourceResolver::new(&ledger, &cache);

        // when
        let first = resolver.resolve(&endpoint, &addr("0xc")).await.unwrap();
        let second = resolver.resolve(&endpoint, &addr("0xc")).await.unwrap();

        // then
        assert_eq!(first, addr("0xee"));
        assert_eq!(second, addr("0xee"));
        assert_eq!(ledger.resolve_calls(), 1);
    }

    #[tokio::test]
    async fn resolve__missing_indirection_is_resolution_not_found() {
        let ledger = FakeLedger::new();
        let cache = AddressCache::new();
        let resolver = ResourceResolver::new(&ledger, &cache);

        let err = resolver
            .resolve(&Endpoint::new("http://a"), &addr("0xc"))
            .await
            .unwrap_err();

        assert_eq!(
            err,
            SyncError::ResolutionNotFound {
                creator: addr("0xc")
            }
        );
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn resolve__transport_failure_does_not_poison_cache() {
        // given
        let ledger = FakeLedger::new();
        ledger.register_game(addr("0xc"), addr("0xee"));
        ledger.fail_next(LedgerError::Unreachable("connection reset".into()));
        let cache = AddressCache::new();
        let resolver = ResourceResolver::new(&ledger, &cache);
        let endpoint = Endpoint::new("http://a");

        // when
        let err = resolver.resolve(&endpoint, &addr("0xc")).await.unwrap_err();
        let retried = resolver.resolve(&endpoint, &addr("0xc")).await;

        // then
        assert!(err.is_transient());
        assert_eq!(retried, Ok(addr("0xee")));
        assert_eq!(cache.len(), 1);
    }
}
