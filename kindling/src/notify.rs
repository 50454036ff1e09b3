//! Production alert delivery.
//!
//! Alerts go out as ordinary mail through the same transport the warmup
//! engine uses, from a dedicated service mailbox. When no alert mailbox
//! is configured the controller falls back to logging the alert, so a
//! minimal deployment still surfaces reputation drops somewhere.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use kindling_report::{AlertContext, Notifier, ReportError, REPUTATION_ALERT};
use kindling_transport::{MailAccount, MailTransport, OutgoingMessage};

/// Sends templated alerts through a [`MailTransport`].
pub struct MailNotifier {
    transport: Arc<dyn MailTransport>,
    account: MailAccount,
}

impl MailNotifier {
    #[must_use]
    pub fn new(transport: Arc<dyn MailTransport>, account: MailAccount) -> Self {
        Self { transport, account }
    }
}

#[async_trait]
impl Notifier for MailNotifier {
    async fn send_templated(
        &self,
        to: &str,
        template_key: &str,
        context: &AlertContext,
    ) -> Result<(), ReportError> {
        let (subject, html_body) = match template_key {
            REPUTATION_ALERT => reputation_alert(context),
            other => {
                return Err(ReportError::Notify(format!(
                    "Unknown alert template {other}"
                )))
            }
        };

        let message = OutgoingMessage {
            to: to.to_string(),
            subject,
            html_body,
            in_reply_to: None,
        };
        self.transport.send_message(&self.account, &message).await?;
        Ok(())
    }
}

fn reputation_alert(context: &AlertContext) -> (String, String) {
    let subject = format!(
        "Reputation alert for {} ({})",
        context.campaign_email, context.date
    );
    let html_body = format!(
        "<p>Hi {username},</p>\
         <p>The warmup report for <b>{campaign}</b> on {date} shows a low \
         inbox placement rate. Messages from this mailbox are landing in \
         spam more often than they should.</p>\
         <p><a href=\"{login_url}\">Review the campaign</a> and consider \
         pausing it until placement recovers.</p>",
        username = context.username,
        campaign = context.campaign_email,
        date = context.date,
        login_url = context.login_url,
    );
    (subject, html_body)
}

/// Fallback notifier that records alerts in the service log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send_templated(
        &self,
        to: &str,
        template_key: &str,
        context: &AlertContext,
    ) -> Result<(), ReportError> {
        warn!(
            to,
            template = template_key,
            campaign = %context.campaign_email,
            date = %context.date,
            "No alert mailbox configured, logging alert instead"
        );
        Ok(())
    }
}
