//! Scriptable transport double for exercising the warmup core without
//! touching a real provider.

use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use chrono::NaiveDate;
use tokio::sync::Notify;

use crate::{MailAccount, MailTransport, OutgoingMessage, TransportError};

/// One submitted message as the mock recorded it.
#[derive(Debug, Clone)]
pub struct SentMessage {
    pub from: String,
    pub to: String,
    pub subject: String,
    pub in_reply_to: Option<String>,
}

/// Mock implementation of `MailTransport` for testing.
#[derive(Debug, Clone, Default)]
pub struct MockTransport {
    sent: Arc<Mutex<Vec<SentMessage>>>,
    rejected_accounts: Arc<Mutex<HashSet<String>>>,
    failing_recipients: Arc<Mutex<HashSet<String>>>,
    message_ids: Arc<Mutex<HashMap<String, String>>>,
    folder_counts: Arc<Mutex<HashMap<(String, String), u32>>>,
    notify: Arc<Notify>,
}

impl MockTransport {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// All messages submitted so far, in submission order.
    ///
    /// # Panics
    /// Panics if the mutex is poisoned
    #[must_use]
    pub fn sent_messages(&self) -> Vec<SentMessage> {
        self.sent
            .lock()
            .expect("MockTransport sent mutex poisoned")
            .clone()
    }

    /// # Panics
    /// Panics if the mutex is poisoned
    #[must_use]
    pub fn sent_count(&self) -> usize {
        self.sent
            .lock()
            .expect("MockTransport sent mutex poisoned")
            .len()
    }

    /// Make every operation for `email` fail as a credential rejection.
    ///
    /// # Panics
    /// Panics if the mutex is poisoned
    pub fn reject_credentials(&self, email: &str) {
        self.rejected_accounts
            .lock()
            .expect("MockTransport accounts mutex poisoned")
            .insert(email.to_string());
    }

    /// Make sends to `recipient` fail with an SMTP error.
    ///
    /// # Panics
    /// Panics if the mutex is poisoned
    pub fn fail_sends_to(&self, recipient: &str) {
        self.failing_recipients
            .lock()
            .expect("MockTransport recipients mutex poisoned")
            .insert(recipient.to_string());
    }

    /// Script the `Message-ID` that subject lookups will find.
    ///
    /// # Panics
    /// Panics if the mutex is poisoned
    pub fn set_message_id(&self, subject: &str, message_id: &str) {
        self.message_ids
            .lock()
            .expect("MockTransport ids mutex poisoned")
            .insert(subject.to_string(), message_id.to_string());
    }

    /// Script the count a folder search for (`email`, `folder`) returns.
    ///
    /// # Panics
    /// Panics if the mutex is poisoned
    pub fn set_folder_count(&self, email: &str, folder: &str, count: u32) {
        self.folder_counts
            .lock()
            .expect("MockTransport folders mutex poisoned")
            .insert((email.to_string(), folder.to_string()), count);
    }

    /// Wait until at least `expected` messages have been submitted.
    ///
    /// # Errors
    /// Returns an error if the timeout is reached before the expected count
    pub async fn wait_for_count(
        &self,
        expected: usize,
        timeout: Duration,
    ) -> Result<(), tokio::time::error::Elapsed> {
        tokio::time::timeout(timeout, async {
            loop {
                let notified = self.notify.notified();
                if self.sent_count() >= expected {
                    return;
                }
                notified.await;
            }
        })
        .await
    }

    fn check_account(&self, email: &str) -> Result<(), TransportError> {
        if self
            .rejected_accounts
            .lock()
            .expect("MockTransport accounts mutex poisoned")
            .contains(email)
        {
            return Err(TransportError::Credentials(format!(
                "Login rejected for {email}"
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl MailTransport for MockTransport {
    async fn send_message(
        &self,
        account: &MailAccount,
        message: &OutgoingMessage,
    ) -> Result<(), TransportError> {
        self.check_account(&account.email)?;

        if self
            .failing_recipients
            .lock()
            .expect("MockTransport recipients mutex poisoned")
            .contains(&message.to)
        {
            return Err(TransportError::Smtp(format!(
                "Recipient refused: {}",
                message.to
            )));
        }

        self.sent
            .lock()
            .expect("MockTransport sent mutex poisoned")
            .push(SentMessage {
                from: account.email.clone(),
                to: message.to.clone(),
                subject: message.subject.clone(),
                in_reply_to: message.in_reply_to.clone(),
            });
        self.notify.notify_waiters();
        Ok(())
    }

    async fn find_latest_message_id_by_subject(
        &self,
        account: &MailAccount,
        _from: &str,
        subject: &str,
    ) -> Result<Option<String>, TransportError> {
        self.check_account(&account.email)?;

        Ok(self
            .message_ids
            .lock()
            .expect("MockTransport ids mutex poisoned")
            .get(subject)
            .cloned())
    }

    async fn count_in_folder(
        &self,
        account: &MailAccount,
        folder: &str,
        _day: NaiveDate,
        _from: &str,
    ) -> Result<u32, TransportError> {
        self.check_account(&account.email)?;

        Ok(self
            .folder_counts
            .lock()
            .expect("MockTransport folders mutex poisoned")
            .get(&(account.email.clone(), folder.to_string()))
            .copied()
            .unwrap_or(0))
    }
}
