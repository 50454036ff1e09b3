//! Reputation reporting: ledger aggregation, placement ratios, and
//! owner alerting.

mod aggregator;
mod error;
mod notify;

pub use aggregator::{Aggregator, ReportConfig};
pub use error::ReportError;
pub use notify::{AlertContext, MockNotifier, Notifier, SentAlert, REPUTATION_ALERT};
