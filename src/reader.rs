use crate::{
    address::AccountAddress,
    endpoints::Endpoint,
    error::SyncError,
    ledger::{
        LedgerTransport,
        RawGameRecord,
    },
};

/// Reads the current game record from a resolved address. Never retries.
pub struct StateReader<'a, T> {
    transport: &'a T,
}

impl<'a, T: LedgerTransport> StateReader<'a, T> {
    pub fn new(transport: &'a T) -> Self {
        Self { transport }
    }

    pub async fn read(
        &self,
        endpoint: &Endpoint,
        address: &AccountAddress,
    ) -> Result<RawGameRecord, SyncError> {
        let record = self
            .transport
            .read_record(endpoint, address)
            .await
            .map_err(|err| {
                SyncError::from_transport(err, endpoint, || SyncError::RecordNotFound {
                    address: *address,
                })
            })?;
        tracing::trace!(%address, ?record, "read game record");
        Ok(record)
    }
}
