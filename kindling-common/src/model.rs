//! Domain model for campaigns, receiver pools, templates, and reports.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Mailbox providers the engine can authenticate against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Gmail,
    Outlook,
}

impl Provider {
    #[must_use]
    pub const fn smtp_host(self) -> &'static str {
        match self {
            Self::Gmail => "smtp.gmail.com",
            Self::Outlook => "smtp.office365.com",
        }
    }

    #[must_use]
    pub const fn imap_host(self) -> &'static str {
        match self {
            Self::Gmail => "imap.gmail.com",
            Self::Outlook => "outlook.office365.com",
        }
    }

    /// Folder holding everything the provider accepted, for classification.
    ///
    /// Gmail exposes a virtual folder spanning all labels; Outlook has no
    /// equivalent, so classification reads `Inbox` and `Junk` separately.
    #[must_use]
    pub const fn all_mail_folder(self) -> Option<&'static str> {
        match self {
            Self::Gmail => Some("[Gmail]/All Mail"),
            Self::Outlook => None,
        }
    }

    #[must_use]
    pub const fn inbox_folder(self) -> &'static str {
        match self {
            Self::Gmail | Self::Outlook => "Inbox",
        }
    }

    #[must_use]
    pub const fn spam_folder(self) -> &'static str {
        match self {
            Self::Gmail => "[Gmail]/Spam",
            Self::Outlook => "Junk",
        }
    }
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Gmail => write!(f, "gmail"),
            Self::Outlook => write!(f, "outlook"),
        }
    }
}

/// Outstanding action blocking a campaign from being scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionRequired {
    #[default]
    None,
    Payment,
    AppPassword,
    Both,
}

/// A mailbox undergoing automated warmup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Campaign {
    /// Unique address of the warmed-up mailbox.
    pub email: String,
    pub provider: Provider,
    /// Vault ciphertext of the mailbox app password. Absence blocks scheduling.
    pub app_password: Option<String>,
    /// Number of sender-initiated messages to send today.
    pub mails_to_send: u32,
    /// Configured per-day ceiling for `mails_to_send`.
    pub max_per_day: u32,
    /// Per-day increment applied while below the ceiling.
    pub step_up: u32,
    pub paused: bool,
    pub cancelled: bool,
    pub action_required: ActionRequired,
    /// Account that owns this campaign, for reporting and alerting.
    pub owner_id: Uuid,
    /// Preferred display name; falls back to the address local part.
    pub display_name: Option<String>,
}

impl Campaign {
    /// Whether the daily cycle may schedule this campaign.
    #[must_use]
    pub fn is_eligible(&self) -> bool {
        !self.paused
            && !self.cancelled
            && self.app_password.is_some()
            && self.action_required == ActionRequired::None
    }

    /// Name used for placeholder personalization.
    #[must_use]
    pub fn persona_name(&self) -> &str {
        self.display_name
            .as_deref()
            .unwrap_or_else(|| local_part(&self.email))
    }
}

/// A receiver mailbox drawn from the shared warmup pool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolMailbox {
    pub email: String,
    pub provider: Provider,
    /// Vault ciphertext of the mailbox app password.
    pub app_password: String,
    pub active: bool,
}

impl PoolMailbox {
    #[must_use]
    pub fn persona_name(&self) -> &str {
        local_part(&self.email)
    }
}

/// One message body within a template's ordered conversation script.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThreadStep {
    /// 1-based position within the template.
    pub ordinal: u32,
    pub body: String,
}

/// A named, ordered conversation script.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Template {
    pub name: String,
    pub subject: String,
    /// Campaign email this template is scoped to; `None` means global.
    pub scope: Option<String>,
    pub is_general: bool,
    pub is_selected: bool,
    /// Steps ordered by `ordinal`.
    pub steps: Vec<ThreadStep>,
}

impl Template {
    /// Thread weight of this template: the number of conversation steps.
    #[must_use]
    pub fn step_count(&self) -> u32 {
        u32::try_from(self.steps.len()).unwrap_or(u32::MAX)
    }

    /// Step bodies in conversation order.
    #[must_use]
    pub fn bodies(&self) -> Vec<String> {
        let mut steps = self.steps.clone();
        steps.sort_by_key(|step| step.ordinal);
        steps.into_iter().map(|step| step.body).collect()
    }
}

/// Per-(campaign, calendar day) delivery classification counts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CampaignReport {
    pub email: String,
    pub report_date: NaiveDate,
    pub total_emails_sent: u32,
    pub inbox_count: u32,
    pub category_count: u32,
    pub spam_count: u32,
    /// `inbox / total * 100`; unset until ratios are computed, and left
    /// unset for zero-total reports.
    pub inbox_ratio: Option<f64>,
    /// `(inbox + category) / total * 100`; same lifecycle as `inbox_ratio`.
    pub reputation_ratio: Option<f64>,
    pub owner_id: Uuid,
}

/// A user account, as far as alerting needs to know about it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub id: Uuid,
    pub email: String,
    pub first_name: Option<String>,
    pub is_master: bool,
    /// The master account this one belongs to, when not itself a master.
    pub master_id: Option<Uuid>,
}

impl Account {
    #[must_use]
    pub fn display_name(&self) -> &str {
        self.first_name
            .as_deref()
            .unwrap_or_else(|| local_part(&self.email))
    }
}

/// The part of an address before the `@`.
#[must_use]
pub fn local_part(email: &str) -> &str {
    email.split('@').next().unwrap_or(email)
}
