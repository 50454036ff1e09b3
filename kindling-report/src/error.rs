use thiserror::Error;

use kindling_common::{ledger::LedgerError, store::StoreError};
use kindling_transport::TransportError;

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Notification error: {0}")]
    Notify(String),
}
