use crate::{
    address::AccountAddress,
    endpoints::Endpoint,
};
use thiserror::Error;

/// Failure reported by a ledger read transport.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    #[error("not found")]
    NotFound,
    #[error("unreachable: {0}")]
    Unreachable(String),
    #[error("rate limited: {0}")]
    RateLimited(String),
}

/// Failure of one resolve-then-read attempt.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    #[error("no game registered for creator {creator}")]
    ResolutionNotFound { creator: AccountAddress },
    #[error("no game record at resolved address {address}")]
    RecordNotFound { address: AccountAddress },
    #[error("ledger endpoint {endpoint} unreachable: {reason}")]
    Unreachable { endpoint: Endpoint, reason: String },
    #[error("ledger endpoint {endpoint} rate limited the request: {reason}")]
    RateLimited { endpoint: Endpoint, reason: String },
}

impl SyncError {
    /// Transport failures are worth another endpoint; not-found answers are not.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unreachable { .. } | Self::RateLimited { .. })
    }

    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimited { .. })
    }

    pub(crate) fn from_transport(
        err: LedgerError,
        endpoint: &Endpoint,
        not_found: impl FnOnce() -> SyncError,
    ) -> Self {
        match err {
            LedgerError::NotFound => not_found(),
            LedgerError::Unreachable(reason) => Self::Unreachable {
                endpoint: endpoint.clone(),
                reason,
            },
            LedgerError::RateLimited(reason) => Self::RateLimited {
                endpoint: endpoint.clone(),
                reason,
            },
        }
    }
}
