pub mod address;

pub mod aptos;

pub mod backoff;

pub mod clock;

pub mod config;

pub mod debounce;

pub mod endpoints;

pub mod engine;

pub mod error;

pub mod ledger;

pub mod pipeline;

pub mod reader;

pub mod reconcile;

pub mod resolver;

pub mod telemetry;

pub mod watchlist;

pub mod test_helpers;

pub use address::AccountAddress;
pub use engine::{
    SyncEngine,
    SyncHandle,
};
pub use error::{
    LedgerError,
    SyncError,
};
pub use ledger::{
    LedgerTransport,
    RawGameRecord,
};
pub use pipeline::SyncContext;
pub use reconcile::{
    GamePhase,
    SyncState,
};
