use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Invalid mail address: {0}")]
    Address(String),

    #[error("Failed to build message: {0}")]
    Build(String),

    #[error("Authentication rejected: {0}")]
    Credentials(String),

    #[error("SMTP failure: {0}")]
    Smtp(String),

    #[error("IMAP failure: {0}")]
    Imap(String),

    #[error("TLS failure: {0}")]
    Tls(String),

    #[error("Blocking task failed: {0}")]
    Task(String),
}

impl TransportError {
    /// Whether this failure means the mailbox credentials themselves
    /// were rejected, as opposed to a transient provider problem.
    #[must_use]
    pub const fn is_credential(&self) -> bool {
        matches!(self, Self::Credentials(_))
    }
}
