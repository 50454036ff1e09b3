//! Provider plumbing: SMTP submission and IMAP mailbox reads behind
//! one async trait, with a scriptable in-memory double for tests.

use async_trait::async_trait;
use chrono::NaiveDate;

use kindling_common::model::Provider;

mod error;
mod live;
mod mock;

pub use error::TransportError;
pub use live::LiveTransport;
pub use mock::{MockTransport, SentMessage};

/// A mailbox the engine acts as, credentials already decrypted.
#[derive(Debug, Clone)]
pub struct MailAccount {
    pub email: String,
    pub display_name: String,
    pub app_password: String,
    pub provider: Provider,
}

/// One message to submit. `in_reply_to` carries the RFC 5322
/// `Message-ID` of the parent when this continues a thread.
#[derive(Debug, Clone)]
pub struct OutgoingMessage {
    pub to: String,
    pub subject: String,
    pub html_body: String,
    pub in_reply_to: Option<String>,
}

/// Everything the warmup core needs from a mail provider.
#[async_trait]
pub trait MailTransport: Send + Sync {
    /// Submit `message` from `account` over authenticated SMTP.
    async fn send_message(
        &self,
        account: &MailAccount,
        message: &OutgoingMessage,
    ) -> Result<(), TransportError>;

    /// `Message-ID` of the newest message in `account`'s inbox matching
    /// both sender and subject, or `None` when nothing matches.
    async fn find_latest_message_id_by_subject(
        &self,
        account: &MailAccount,
        from: &str,
        subject: &str,
    ) -> Result<Option<String>, TransportError>;

    /// Number of messages from `from` landing in `folder` on `day`.
    async fn count_in_folder(
        &self,
        account: &MailAccount,
        folder: &str,
        day: NaiveDate,
        from: &str,
    ) -> Result<u32, TransportError>;
}
