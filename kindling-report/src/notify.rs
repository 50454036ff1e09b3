//! Outbound alerting seam.
//!
//! Reputation alerts go through this trait so the aggregator stays
//! testable and the actual delivery channel (templated provider mail,
//! webhook, whatever the deployment wires in) is a controller concern.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::Serialize;

use crate::error::ReportError;

/// Template key for a reputation drop warning.
pub const REPUTATION_ALERT: &str = "reputation-alert";

/// Substitution values for an alert template.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlertContext {
    pub username: String,
    pub date: String,
    pub campaign_email: String,
    pub login_url: String,
}

#[async_trait]
pub trait Notifier: Send + Sync {
    /// Send a templated notification to one address.
    async fn send_templated(
        &self,
        to: &str,
        template_key: &str,
        context: &AlertContext,
    ) -> Result<(), ReportError>;
}

/// One delivered mock notification.
#[derive(Debug, Clone, PartialEq)]
pub struct SentAlert {
    pub to: String,
    pub template_key: String,
    pub context: AlertContext,
}

/// Mock implementation of `Notifier` for testing.
#[derive(Debug, Clone, Default)]
pub struct MockNotifier {
    sent: Arc<Mutex<Vec<SentAlert>>>,
}

impl MockNotifier {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// # Panics
    /// Panics if the mutex is poisoned
    #[must_use]
    pub fn sent_alerts(&self) -> Vec<SentAlert> {
        self.sent
            .lock()
            .expect("MockNotifier sent mutex poisoned")
            .clone()
    }
}

#[async_trait]
impl Notifier for MockNotifier {
    async fn send_templated(
        &self,
        to: &str,
        template_key: &str,
        context: &AlertContext,
    ) -> Result<(), ReportError> {
        self.sent
            .lock()
            .expect("MockNotifier sent mutex poisoned")
            .push(SentAlert {
                to: to.to_string(),
                template_key: template_key.to_string(),
                context: context.clone(),
            });
        Ok(())
    }
}
