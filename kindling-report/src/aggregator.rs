//! Nightly reputation aggregation over the delivery ledger.
//!
//! For every (pool mailbox, campaign) pair with ledger traffic on a
//! day, the aggregator asks the pool mailbox's provider where the
//! campaign's messages landed and folds the classification into the
//! campaign's per-day report. Ratios and alerting run as a second
//! pass so re-aggregation can never double-alert half-built reports.

use std::sync::Arc;

use chrono::NaiveDate;
use serde::Deserialize;
use tracing::{debug, info, warn};

use kindling_common::{
    ledger::{Ledger, LedgerError},
    model::{Account, CampaignReport},
    store::{AccountDirectory, CampaignStore, PoolStore, ReportStore},
};
use kindling_transport::{MailAccount, MailTransport, TransportError};
use kindling_vault::Vault;

use crate::{
    error::ReportError,
    notify::{AlertContext, Notifier, REPUTATION_ALERT},
};

const fn default_alert_threshold() -> f64 {
    30.0
}

fn default_login_url() -> String {
    "https://app.example.com/login".to_string()
}

/// Aggregation and alerting settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ReportConfig {
    /// Reputation ratio (percent) below which owners are alerted
    #[serde(default = "default_alert_threshold")]
    pub alert_threshold: f64,

    /// Login link embedded in alert mails
    #[serde(default = "default_login_url")]
    pub login_url: String,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            alert_threshold: default_alert_threshold(),
            login_url: default_login_url(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Classified {
    inbox: u32,
    category: u32,
    spam: u32,
}

/// Builds per-day campaign reports and raises reputation alerts.
pub struct Aggregator {
    campaigns: Arc<dyn CampaignStore>,
    pool: Arc<dyn PoolStore>,
    reports: Arc<dyn ReportStore>,
    accounts: Arc<dyn AccountDirectory>,
    vault: Arc<Vault>,
    transport: Arc<dyn MailTransport>,
    ledger: Arc<Ledger>,
    notifier: Arc<dyn Notifier>,
    config: ReportConfig,
}

impl Aggregator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        campaigns: Arc<dyn CampaignStore>,
        pool: Arc<dyn PoolStore>,
        reports: Arc<dyn ReportStore>,
        accounts: Arc<dyn AccountDirectory>,
        vault: Arc<Vault>,
        transport: Arc<dyn MailTransport>,
        ledger: Arc<Ledger>,
        notifier: Arc<dyn Notifier>,
        config: ReportConfig,
    ) -> Self {
        Self {
            campaigns,
            pool,
            reports,
            accounts,
            vault,
            transport,
            ledger,
            notifier,
            config,
        }
    }

    /// Fold the day's ledger into campaign reports.
    ///
    /// A day without a ledger partition is not an error: nothing ran,
    /// there is nothing to report. Per-mailbox and per-pair failures
    /// are logged and skipped; counts already folded in stay.
    ///
    /// # Errors
    ///
    /// Returns an error on store failures or unreadable (but present)
    /// ledger partitions.
    pub async fn build_reports(&self, day: NaiveDate) -> Result<(), ReportError> {
        let records = match self.ledger.read_day(day) {
            Ok(records) => records,
            Err(LedgerError::MissingLogFile(_)) => {
                info!(%day, "No delivery log for day, skipping report build");
                return Ok(());
            }
            Err(error) => return Err(error.into()),
        };

        let pool = self.pool.active_mailboxes().await?;
        let campaigns = self.campaigns.eligible_campaigns().await?;

        for mailbox in pool {
            let password = match self.vault.decrypt(&mailbox.app_password) {
                Ok(password) => password,
                Err(error) => {
                    warn!(mailbox = %mailbox.email, %error, "Skipping unreadable pool credential");
                    continue;
                }
            };
            let account = MailAccount {
                email: mailbox.email.clone(),
                display_name: mailbox.persona_name().to_string(),
                app_password: password,
                provider: mailbox.provider,
            };

            for campaign in &campaigns {
                let total = records
                    .iter()
                    .filter(|record| {
                        record.sender.email == campaign.email
                            && record.receiver.email == mailbox.email
                    })
                    .count();
                let Ok(total) = u32::try_from(total) else {
                    continue;
                };
                if total == 0 {
                    continue;
                }

                let counts = match self.classify(&account, day, &campaign.email, total).await {
                    Ok(counts) => counts,
                    Err(error) => {
                        warn!(
                            mailbox = %mailbox.email,
                            campaign = %campaign.email,
                            %error,
                            "Classification failed for pair, skipping"
                        );
                        continue;
                    }
                };

                debug!(
                    campaign = %campaign.email,
                    mailbox = %mailbox.email,
                    total,
                    inbox = counts.inbox,
                    category = counts.category,
                    spam = counts.spam,
                    "Folding pair into report"
                );

                self.reports
                    .add_counts(CampaignReport {
                        email: campaign.email.clone(),
                        report_date: day,
                        total_emails_sent: total,
                        inbox_count: counts.inbox,
                        category_count: counts.category,
                        spam_count: counts.spam,
                        inbox_ratio: None,
                        reputation_ratio: None,
                        owner_id: campaign.owner_id,
                    })
                    .await?;
            }
        }

        Ok(())
    }

    /// Where did `from`'s messages to this mailbox land on `day`?
    ///
    /// Gmail exposes an all-mail folder, so the category count is
    /// everything accepted minus the inbox. Outlook has no such
    /// folder; the category is inferred from the ledger total.
    async fn classify(
        &self,
        account: &MailAccount,
        day: NaiveDate,
        from: &str,
        total: u32,
    ) -> Result<Classified, TransportError> {
        let inbox = self
            .transport
            .count_in_folder(account, account.provider.inbox_folder(), day, from)
            .await?;
        let spam = self
            .transport
            .count_in_folder(account, account.provider.spam_folder(), day, from)
            .await?;

        let category = match account.provider.all_mail_folder() {
            Some(all_mail) => {
                let accepted = self
                    .transport
                    .count_in_folder(account, all_mail, day, from)
                    .await?;
                accepted.saturating_sub(inbox)
            }
            None => total.saturating_sub(inbox + spam),
        };

        Ok(Classified {
            inbox,
            category,
            spam,
        })
    }

    /// Compute ratios for the day's reports and alert on poor ones.
    ///
    /// Zero-total reports keep their ratios unset and never alert.
    ///
    /// # Errors
    ///
    /// Returns an error on store failures; notification failures are
    /// logged per recipient and do not stop the pass.
    pub async fn compute_ratios_and_alert(&self, day: NaiveDate) -> Result<(), ReportError> {
        let reports = self.reports.reports_for_day(day).await?;

        for report in reports {
            if report.total_emails_sent == 0 {
                debug!(campaign = %report.email, "Zero-total report, leaving ratios unset");
                continue;
            }

            let total = f64::from(report.total_emails_sent);
            let inbox_ratio = f64::from(report.inbox_count) / total * 100.0;
            let reputation_ratio =
                f64::from(report.inbox_count + report.category_count) / total * 100.0;

            self.reports
                .set_ratios(
                    &report.email,
                    day,
                    Some(inbox_ratio),
                    Some(reputation_ratio),
                )
                .await?;

            if reputation_ratio < self.config.alert_threshold {
                self.alert(&report, day, reputation_ratio).await?;
            }
        }

        Ok(())
    }

    async fn alert(
        &self,
        report: &CampaignReport,
        day: NaiveDate,
        reputation_ratio: f64,
    ) -> Result<(), ReportError> {
        let Some(owner) = self.accounts.get_account(report.owner_id).await? else {
            warn!(campaign = %report.email, "Report owner not found, skipping alert");
            return Ok(());
        };

        info!(
            campaign = %report.email,
            reputation_ratio,
            threshold = self.config.alert_threshold,
            "Reputation below threshold, alerting"
        );

        self.notify_account(&owner, report, day).await;

        if let Some(master_id) = owner.master_id.filter(|_| !owner.is_master) {
            match self.accounts.get_account(master_id).await? {
                Some(master) => self.notify_account(&master, report, day).await,
                None => {
                    warn!(campaign = %report.email, "Master account not found, owner alerted only");
                }
            }
        }

        Ok(())
    }

    async fn notify_account(&self, account: &Account, report: &CampaignReport, day: NaiveDate) {
        let context = AlertContext {
            username: account.display_name().to_string(),
            date: day.format("%d-%m-%Y").to_string(),
            campaign_email: report.email.clone(),
            login_url: self.config.login_url.clone(),
        };
        if let Err(error) = self
            .notifier
            .send_templated(&account.email, REPUTATION_ALERT, &context)
            .await
        {
            warn!(to = %account.email, %error, "Failed to deliver reputation alert");
        }
    }
}
