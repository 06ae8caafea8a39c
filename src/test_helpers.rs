//! In-memory ledger and fixtures shared by unit and integration tests.

use crate::{
    address::AccountAddress,
    endpoints::{
        Endpoint,
        EndpointSelector,
    },
    error::LedgerError,
    ledger::{
        IndirectionRecord,
        LedgerTransport,
        RawGameRecord,
    },
    pipeline::SyncContext,
};
use std::{
    collections::{
        HashMap,
        VecDeque,
    },
    sync::{
        Arc,
        Mutex,
        MutexGuard,
    },
    time::Duration,
};

pub fn addr(raw: &str) -> AccountAddress {
    raw.parse().expect("test address must be hex")
}

pub fn record(creator: AccountAddress, started: bool, timer_end: u64) -> RawGameRecord {
    RawGameRecord {
        creator,
        total_deposit: 100_000_000,
        ticket_price: 10_000_000,
        timer_end,
        last_buyer: None,
        started,
        declared_winner: None,
    }
}

pub fn context(urls: &[&str]) -> SyncContext {
    let endpoints = urls.iter().map(|url| Endpoint::new(*url)).collect();
    SyncContext::new(EndpointSelector::new(endpoints).expect("at least one endpoint"))
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CallKind {
    Resolve,
    Read,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LedgerCall {
    pub endpoint: Endpoint,
    pub kind: CallKind,
}

#[derive(Default)]
struct LedgerState {
    games: HashMap<AccountAddress, AccountAddress>,
    records: HashMap<AccountAddress, RawGameRecord>,
    fail_next: VecDeque<LedgerError>,
    fail_always: Option<LedgerError>,
    endpoint_failures: HashMap<Endpoint, LedgerError>,
    read_latencies: VecDeque<Duration>,
    calls: Vec<LedgerCall>,
}

/// Scripted ledger. Answers are captured when a call starts and delivered
/// after its latency, like a response already on the wire.
#[derive(Clone, Default)]
pub struct FakeLedger {
    state: Arc<Mutex<LedgerState>>,
}

impl FakeLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_game(&self, creator: AccountAddress, resolved: AccountAddress) {
        self.lock().games.insert(creator, resolved);
    }

    pub fn set_record(&self, address: AccountAddress, record: RawGameRecord) {
        self.lock().records.insert(address, record);
    }

    pub fn fail_next(&self, err: LedgerError) {
        self.lock().fail_next.push_back(err);
    }

    pub fn fail_always(&self, err: LedgerError) {
        self.lock().fail_always = Some(err);
    }

    pub fn fail_endpoint(&self, endpoint: Endpoint, err: LedgerError) {
        self.lock().endpoint_failures.insert(endpoint, err);
    }

    /// Clears every scripted failure.
    pub fn heal(&self) {
        let mut state = self.lock();
        state.fail_next.clear();
        state.fail_always = None;
        state.endpoint_failures.clear();
    }

    /// Delay for the next record read only.
    pub fn push_latency(&self, latency: Duration) {
        self.lock().read_latencies.push_back(latency);
    }

    pub fn calls(&self) -> Vec<LedgerCall> {
        self.lock().calls.clone()
    }

    pub fn resolve_calls(&self) -> usize {
        self.count(CallKind::Resolve)
    }

    pub fn read_calls(&self) -> usize {
        self.count(CallKind::Read)
    }

    fn count(&self, kind: CallKind) -> usize {
        self.lock().calls.iter().filter(|c| c.kind == kind).count()
    }

    fn lock(&self) -> MutexGuard<'_, LedgerState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn begin_call(&self, endpoint: &Endpoint, kind: CallKind) -> (Option<LedgerError>, Duration) {
        let mut state = self.lock();
        state.calls.push(LedgerCall {
            endpoint: endpoint.clone(),
            kind,
        });
        let failure = state
            .fail_always
            .clone()
            .or_else(|| state.endpoint_failures.get(endpoint).cloned())
            .or_else(|| state.fail_next.pop_front());
        let latency = match kind {
            CallKind::Read => state.read_latencies.pop_front(),
            CallKind::Resolve => None,
        }
        .unwrap_or_default();
        (failure, latency)
    }
}

async fn deliver<R>(answer: Result<R, LedgerError>, latency: Duration) -> Result<R, LedgerError> {
    if !latency.is_zero() {
        tokio::time::sleep(latency).await;
    }
    answer
}

impl LedgerTransport for FakeLedger {
    async fn resolve_indirection(
        &self,
        endpoint: &Endpoint,
        creator: &AccountAddress,
    ) -> Result<IndirectionRecord, LedgerError> {
        let (failure, latency) = self.begin_call(endpoint, CallKind::Resolve);
        let answer = match failure {
            Some(err) => Err(err),
            None => self
                .lock()
                .games
                .get(creator)
                .map(|resource_address| IndirectionRecord {
                    resource_address: *resource_address,
                })
                .ok_or(LedgerError::NotFound),
        };
        deliver(answer, latency).await
    }

    async fn read_record(
        &self,
        endpoint: &Endpoint,
        address: &AccountAddress,
    ) -> Result<RawGameRecord, LedgerError> {
        let (failure, latency) = self.begin_call(endpoint, CallKind::Read);
        let answer = match failure {
            Some(err) => Err(err),
            None => self
                .lock()
                .records
                .get(address)
                .cloned()
                .ok_or(LedgerError::NotFound),
        };
        deliver(answer, latency).await
    }
}
