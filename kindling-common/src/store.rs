//! Repository traits over long-lived entities, plus an in-memory backend.
//!
//! The scheduling core treats persistence as synchronous and strongly
//! consistent; these traits are the seam where a database-backed
//! implementation plugs in. The in-memory store is primarily intended
//! for testing, but can also serve transient single-process setups.

use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
};

use async_trait::async_trait;
use chrono::NaiveDate;
use thiserror::Error;
use uuid::Uuid;

use crate::model::{Account, Campaign, CampaignReport, PoolMailbox, Template};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Store backend error: {0}")]
    Backend(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Campaign persistence as the scheduling engine sees it.
#[async_trait]
pub trait CampaignStore: Send + Sync {
    /// Campaigns the daily cycle may schedule (not paused or cancelled,
    /// app password present, no outstanding action).
    async fn eligible_campaigns(&self) -> Result<Vec<Campaign>>;

    async fn get_campaign(&self, email: &str) -> Result<Option<Campaign>>;

    /// Persist an updated daily-send counter.
    async fn set_mails_to_send(&self, email: &str, mails_to_send: u32) -> Result<()>;
}

/// Receiver-pool persistence.
#[async_trait]
pub trait PoolStore: Send + Sync {
    async fn active_mailboxes(&self) -> Result<Vec<PoolMailbox>>;
}

/// Template persistence, read-only to the scheduling core.
#[async_trait]
pub trait TemplateStore: Send + Sync {
    /// Templates scoped to one campaign's email and flagged selected.
    async fn scoped_selected(&self, campaign_email: &str) -> Result<Vec<Template>>;

    /// Globally shared fallback templates.
    async fn general(&self) -> Result<Vec<Template>>;
}

/// Campaign report persistence with additive upsert semantics.
#[async_trait]
pub trait ReportStore: Send + Sync {
    /// Create the `(email, report_date)` report from `delta`, or add its
    /// counts onto the existing row. Never overwrites counts.
    async fn add_counts(&self, delta: CampaignReport) -> Result<()>;

    async fn reports_for_day(&self, day: NaiveDate) -> Result<Vec<CampaignReport>>;

    async fn get_report(&self, email: &str, day: NaiveDate) -> Result<Option<CampaignReport>>;

    async fn set_ratios(
        &self,
        email: &str,
        day: NaiveDate,
        inbox_ratio: Option<f64>,
        reputation_ratio: Option<f64>,
    ) -> Result<()>;
}

/// Minimal account lookup needed by alerting.
#[async_trait]
pub trait AccountDirectory: Send + Sync {
    async fn get_account(&self, id: Uuid) -> Result<Option<Account>>;
}

/// In-memory backend implementing every repository trait.
///
/// `HashMap`s behind `RwLock`s, recovering gracefully from poisoned
/// locks by accessing the underlying data.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    campaigns: Arc<RwLock<HashMap<String, Campaign>>>,
    pool: Arc<RwLock<Vec<PoolMailbox>>>,
    templates: Arc<RwLock<Vec<Template>>>,
    reports: Arc<RwLock<HashMap<(String, NaiveDate), CampaignReport>>>,
    accounts: Arc<RwLock<HashMap<Uuid, Account>>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_campaign(&self, campaign: Campaign) {
        self.campaigns
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .insert(campaign.email.clone(), campaign);
    }

    pub fn insert_pool_mailbox(&self, mailbox: PoolMailbox) {
        self.pool
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(mailbox);
    }

    pub fn insert_template(&self, template: Template) {
        self.templates
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(template);
    }

    pub fn insert_account(&self, account: Account) {
        self.accounts
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .insert(account.id, account);
    }
}

#[async_trait]
impl CampaignStore for MemoryStore {
    async fn eligible_campaigns(&self) -> Result<Vec<Campaign>> {
        Ok(self
            .campaigns
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .values()
            .filter(|campaign| campaign.is_eligible())
            .cloned()
            .collect())
    }

    async fn get_campaign(&self, email: &str) -> Result<Option<Campaign>> {
        Ok(self
            .campaigns
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(email)
            .cloned())
    }

    async fn set_mails_to_send(&self, email: &str, mails_to_send: u32) -> Result<()> {
        let mut campaigns = self
            .campaigns
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let campaign = campaigns
            .get_mut(email)
            .ok_or_else(|| StoreError::NotFound(format!("campaign {email}")))?;
        campaign.mails_to_send = mails_to_send;
        Ok(())
    }
}

#[async_trait]
impl PoolStore for MemoryStore {
    async fn active_mailboxes(&self) -> Result<Vec<PoolMailbox>> {
        Ok(self
            .pool
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .iter()
            .filter(|mailbox| mailbox.active)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl TemplateStore for MemoryStore {
    async fn scoped_selected(&self, campaign_email: &str) -> Result<Vec<Template>> {
        Ok(self
            .templates
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .iter()
            .filter(|template| {
                template.is_selected && template.scope.as_deref() == Some(campaign_email)
            })
            .cloned()
            .collect())
    }

    async fn general(&self) -> Result<Vec<Template>> {
        Ok(self
            .templates
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .iter()
            .filter(|template| template.is_general)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl ReportStore for MemoryStore {
    async fn add_counts(&self, delta: CampaignReport) -> Result<()> {
        let mut reports = self
            .reports
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let key = (delta.email.clone(), delta.report_date);
        match reports.get_mut(&key) {
            Some(existing) => {
                existing.total_emails_sent += delta.total_emails_sent;
                existing.inbox_count += delta.inbox_count;
                existing.category_count += delta.category_count;
                existing.spam_count += delta.spam_count;
            }
            None => {
                reports.insert(key, delta);
            }
        }
        Ok(())
    }

    async fn reports_for_day(&self, day: NaiveDate) -> Result<Vec<CampaignReport>> {
        Ok(self
            .reports
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .values()
            .filter(|report| report.report_date == day)
            .cloned()
            .collect())
    }

    async fn get_report(&self, email: &str, day: NaiveDate) -> Result<Option<CampaignReport>> {
        Ok(self
            .reports
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(&(email.to_string(), day))
            .cloned())
    }

    async fn set_ratios(
        &self,
        email: &str,
        day: NaiveDate,
        inbox_ratio: Option<f64>,
        reputation_ratio: Option<f64>,
    ) -> Result<()> {
        let mut reports = self
            .reports
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let report = reports
            .get_mut(&(email.to_string(), day))
            .ok_or_else(|| StoreError::NotFound(format!("report {email} {day}")))?;
        report.inbox_ratio = inbox_ratio;
        report.reputation_ratio = reputation_ratio;
        Ok(())
    }
}

#[async_trait]
impl AccountDirectory for MemoryStore {
    async fn get_account(&self, id: Uuid) -> Result<Option<Account>> {
        Ok(self
            .accounts
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(&id)
            .cloned())
    }
}
