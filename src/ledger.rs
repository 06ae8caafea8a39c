use crate::{
    address::AccountAddress,
    endpoints::Endpoint,
    error::LedgerError,
};
use serde::{
    Deserialize,
    Serialize,
};

/// Points from a creator account to the account holding the live game.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndirectionRecord {
    pub resource_address: AccountAddress,
}

/// Snapshot of the game exactly as the ledger reported it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawGameRecord {
    pub creator: AccountAddress,
    /// octas
    pub total_deposit: u64,
    /// octas
    pub ticket_price: u64,
    /// unix seconds
    pub timer_end: u64,
    pub last_buyer: Option<AccountAddress>,
    pub started: bool,
    /// Only present when the game resource carries an explicit winner field.
    #[serde(default)]
    pub declared_winner: Option<AccountAddress>,
}

/// Read-only access to the ledger through a caller-chosen endpoint.
///
/// Implementations must not retry; retry and rotation live in
/// [`crate::pipeline`].
pub trait LedgerTransport: Send + Sync + 'static {
    fn resolve_indirection(
        &self,
        endpoint: &Endpoint,
        creator: &AccountAddress,
    ) -> impl Future<Output = Result<IndirectionRecord, LedgerError>> + Send;

    fn read_record(
        &self,
        endpoint: &Endpoint,
        address: &AccountAddress,
    ) -> impl Future<Output = Result<RawGameRecord, LedgerError>> + Send;
}
