//! One synchronization cycle: resolve the game address, then read the record,
//! rotating across endpoints on transport failures.

use crate::{
    address::AccountAddress,
    endpoints::{
        Endpoint,
        EndpointSelector,
    },
    error::SyncError,
    ledger::{
        LedgerTransport,
        RawGameRecord,
    },
    reader::StateReader,
    resolver::{
        AddressCache,
        ResourceResolver,
    },
};
use std::sync::{
    Mutex,
    MutexGuard,
};

/// Shared, explicitly owned selection state: the endpoint cursor and the
/// resolved-address cache. One per engine; tests build their own.
#[derive(Debug)]
pub struct SyncContext {
    endpoints: Mutex<EndpointSelector>,
    cache: AddressCache,
}

impl SyncContext {
    pub fn new(endpoints: EndpointSelector) -> Self {
        Self {
            endpoints: Mutex::new(endpoints),
            cache: AddressCache::new(),
        }
    }

    pub fn current_endpoint(&self) -> Endpoint {
        self.selector().current().clone()
    }

    pub fn rotate_endpoint(&self) -> Endpoint {
        self.selector().rotate().clone()
    }

    pub fn endpoint_count(&self) -> usize {
        self.selector().len()
    }

    pub fn cache(&self) -> &AddressCache {
        &self.cache
    }

    fn selector(&self) -> MutexGuard<'_, EndpointSelector> {
        self.endpoints
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// A record read during a successful cycle.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Observation {
    pub record: RawGameRecord,
    pub resolved: AccountAddress,
    pub endpoint: Endpoint,
}

/// Why a cycle gave up.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CycleFailure {
    pub error: SyncError,
    pub attempts: usize,
    /// Any attempt in the cycle was rate limited.
    pub rate_limited: bool,
}

/// Backoff class of a surfaced failure.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FailureClass {
    Transient,
    RateLimited,
    /// The ledger answered; there is simply nothing there.
    Terminal,
}

impl CycleFailure {
    pub fn class(&self) -> FailureClass {
        if !self.error.is_transient() {
            FailureClass::Terminal
        } else if self.rate_limited {
            FailureClass::RateLimited
        } else {
            FailureClass::Transient
        }
    }
}

/// Runs resolve-then-read for `creator`, trying each configured endpoint at
/// most once. Every transport failure rotates the shared selector, so the next
/// cycle starts on the endpoint after the last one that failed.
pub async fn run_cycle<T: LedgerTransport>(
    context: &SyncContext,
    transport: &T,
    creator: &AccountAddress,
) -> Result<Observation, CycleFailure> {
    let max_attempts = context.endpoint_count();
    let mut rate_limited = false;
    let mut attempt = 0;
    loop {
        attempt += 1;
        let endpoint = context.current_endpoint();
        match attempt_once(context, transport, &endpoint, creator).await {
            Ok((resolved, record)) => {
                return Ok(Observation {
                    record,
                    resolved,
                    endpoint,
                });
            }
            Err(error) if error.is_transient() => {
                rate_limited |= error.is_rate_limited();
                tracing::warn!(attempt, max_attempts, %error, "ledger read failed");
                context.rotate_endpoint();
                if attempt >= max_attempts {
                    return Err(CycleFailure {
                        error,
                        attempts: attempt,
                        rate_limited,
                    });
                }
            }
            Err(error) => {
                return Err(CycleFailure {
                    error,
                    attempts: attempt,
                    rate_limited,
                });
            }
        }
    }
}

async fn attempt_once<T: LedgerTransport>(
    context: &SyncContext,
    transport: &T,
    endpoint: &Endpoint,
    creator: &AccountAddress,
) -> Result<(AccountAddress, RawGameRecord), SyncError> {
    let resolved = ResourceResolver::new(transport, context.cache())
        .resolve(endpoint, creator)
        .await?;
    let record = StateReader::new(transport).read(endpoint, &resolved).await?;
    Ok((resolved, record))
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
            context,
            record,
        },
    };
    use std::collections::HashSet;

    fn game_ledger() -> FakeLedger {
        let ledger = FakeLedger::new();
        ledger.register_game(addr("0xc"), addr("0xee"));
        ledger.set_record(addr("0xee"), record(addr("0xc"), true, 500));
        ledger
    }

    #[tokio::test]
    async fn run_cycle__succeeds_on_first_healthy_endpoint() {
        // given
        let ledger = game_ledger();
        let ctx = context(&["http://a", "http://b"]);

        // when
        let observation = run_cycle(&ctx, &ledger, &addr("0xc")).await.unwrap();

        // then
        assert_eq!(observation.endpoint, Endpoint::new("http://a"));
        assert_eq!(observation.resolved, addr("0xee"));
        assert_eq!(observation.record.timer_end, 500);
    }

    #[tokio::test]
    async fn run_cycle__rotates_past_unreachable_endpoint() {
        // given
        let ledger = game_ledger();
        ledger.fail_endpoint(
            Endpoint::new("http://a"),
            LedgerError::Unreachable("timeout".into()),
        );
        let ctx = context(&["http://a", "http://b", "http://c"]);

        // when
        let observation = run_cycle(&ctx, &ledger, &addr("0xc")).await.unwrap();

        // then
        assert_eq!(observation.endpoint, Endpoint::new("http://b"));
        assert_eq!(ctx.current_endpoint(), Endpoint::new("http://b"));
    }

    #[tokio::test]
    async fn run_cycle__tries_every_endpoint_before_giving_up() {
        // given
        let ledger = game_ledger();
        ledger.fail_always(LedgerError::Unreachable("down".into()));
        let ctx = context(&["http://a", "http://b", "http://c"]);

        // when
        let failure = run_cycle(&ctx, &ledger, &addr("0xc")).await.unwrap_err();

        // then
        assert_eq!(failure.attempts, 3);
        assert_eq!(failure.class(), FailureClass::Transient);
        let tried: HashSet<Endpoint> = ledger.calls().into_iter().map(|c| c.endpoint).collect();
        assert_eq!(tried.len(), 3);
        assert_eq!(ctx.current_endpoint(), Endpoint::new("http://a"));
    }

    #[tokio::test]
    async fn run_cycle__single_endpoint_gives_up_after_one_attempt() {
        let ledger = game_ledger();
        ledger.fail_always(LedgerError::Unreachable("down".into()));
        let ctx = context(&["http://only"]);

        let failure = run_cycle(&ctx, &ledger, &addr("0xc")).await.unwrap_err();

        assert_eq!(failure.attempts, 1);
        assert_eq!(ledger.calls().len(), 1);
    }

    #[tokio::test]
    async fn run_cycle__not_found_stops_without_rotation() {
        // given
        let ledger = FakeLedger::new();
        let ctx = context(&["http://a", "http://b"]);

        // when
        let failure = run_cycle(&ctx, &ledger, &addr("0xc")).await.unwrap_err();

        // then
        assert_eq!(failure.attempts, 1);
        assert_eq!(failure.class(), FailureClass::Terminal);
        assert_eq!(ctx.current_endpoint(), Endpoint::new("http://a"));
    }

    #[tokio::test]
    async fn run_cycle__rate_limit_anywhere_marks_cycle_rate_limited() {
        // given
        let ledger = game_ledger();
        ledger.fail_endpoint(
            Endpoint::new("http://a"),
            LedgerError::RateLimited("429 Too Many Requests".into()),
        );
        ledger.fail_endpoint(
            Endpoint::new("http://b"),
            LedgerError::Unreachable("502 Bad Gateway".into()),
        );
        let ctx = context(&["http://a", "http://b"]);

        // when
        let failure = run_cycle(&ctx, &ledger, &addr("0xc")).await.unwrap_err();

        // then
        assert!(failure.rate_limited);
        assert_eq!(failure.class(), FailureClass::RateLimited);
    }
}
