//! Typed error handling for warmup scheduling.
//!
//! Failures are categorized so the engine can decide what to contain:
//! - Configuration errors surface at startup
//! - Credential errors skip one campaign or one turn
//! - Transport errors are recorded on the ledger, never fatal
//! - System errors (stores, ledger I/O) abort the operation that hit them

use thiserror::Error;

use kindling_common::{ledger::LedgerError, store::StoreError};
use kindling_transport::TransportError;
use kindling_vault::VaultError;

/// Top-level warmup error type.
#[derive(Debug, Error)]
pub enum WarmupError {
    /// Invalid engine configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A stored credential could not be decrypted or was rejected.
    #[error("Credential failure: {0}")]
    Credential(#[from] VaultError),

    /// A provider interaction failed.
    #[error("Transport failure: {0}")]
    Transport(#[from] TransportError),

    /// Infrastructure failure: stores or the delivery ledger.
    #[error("System error: {0}")]
    System(#[from] SystemError),
}

/// Failures of the engine's own infrastructure.
#[derive(Debug, Error)]
pub enum SystemError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<StoreError> for WarmupError {
    fn from(err: StoreError) -> Self {
        Self::System(SystemError::Store(err))
    }
}

impl From<LedgerError> for WarmupError {
    fn from(err: LedgerError) -> Self {
        Self::System(SystemError::Ledger(err))
    }
}

impl WarmupError {
    /// Returns `true` if this error means a credential is unusable.
    #[must_use]
    pub const fn is_credential(&self) -> bool {
        matches!(self, Self::Credential(_))
            || matches!(self, Self::Transport(t) if t.is_credential())
    }

    /// Returns `true` if this error came from a provider interaction.
    #[must_use]
    pub const fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_))
    }

    /// Returns `true` if this error is an infrastructure failure that
    /// should abort the surrounding operation.
    #[must_use]
    pub const fn is_system(&self) -> bool {
        matches!(self, Self::System(_))
    }
}
