//! Append-only, date-partitioned delivery log.
//!
//! One JSON object per line, one file per calendar day. The ledger is
//! the system of record for "how many messages has this sender sent
//! today" and the sole input to nightly report aggregation. Lines are
//! immutable once written.

use std::{
    fs::OpenOptions,
    io::{BufRead, BufReader, Write},
    path::{Path, PathBuf},
    sync::Mutex,
};

use chrono::{Local, NaiveDate};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::model::Provider;

#[derive(Debug, Error)]
pub enum LedgerError {
    /// No partition exists for the requested day.
    #[error("No delivery log for {0}")]
    MissingLogFile(NaiveDate),

    #[error("Ledger I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Ledger serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Sender identity as recorded on a delivery line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SenderLine {
    pub name: String,
    pub email: String,
    pub email_provider: Provider,
    pub send_max_emails_per_day: u32,
    pub total_number_of_sent_mails: u32,
}

/// Receiver identity as recorded on a delivery line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReceiverLine {
    pub name: String,
    pub email: String,
    pub email_provider: Provider,
}

/// One attempted send. Field names are a wire format consumed by
/// downstream tooling; do not rename.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryRecord {
    pub sender: SenderLine,
    pub receiver: ReceiverLine,
    pub mail_sent_status: bool,
    pub template_subject: String,
    pub message_id: Option<String>,
    /// 1-based step index within the conversation.
    pub thread_number: u32,
    pub date: String,
    pub time: String,
    pub datetime: String,
    pub msg: String,
    pub body: String,
}

impl DeliveryRecord {
    /// Fill in the three timestamp fields from the local clock.
    #[must_use]
    pub fn stamped(mut self) -> Self {
        let now = Local::now();
        self.date = now.format("%d-%m-%Y").to_string();
        self.time = now.format("%H:%M:%S").to_string();
        self.datetime = now.format("%d-%m-%Y %H:%M:%S").to_string();
        self
    }
}

/// File-backed delivery ledger.
#[derive(Debug)]
pub struct Ledger {
    dir: PathBuf,
    write_lock: Mutex<()>,
}

impl Ledger {
    /// Open (and create, if needed) a ledger directory.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, LedgerError> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            write_lock: Mutex::new(()),
        })
    }

    fn partition_path(&self, day: NaiveDate) -> PathBuf {
        self.dir.join(format!("{}_records.log", day.format("%Y-%m-%d")))
    }

    /// Append one record to the day's partition, creating it on first write.
    pub fn append(&self, day: NaiveDate, record: &DeliveryRecord) -> Result<(), LedgerError> {
        let line = serde_json::to_string(record)?;
        let _guard = self
            .write_lock
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.partition_path(day))?;
        writeln!(file, "{line}")?;
        Ok(())
    }

    /// Read every record for a day.
    ///
    /// Malformed lines are skipped with a warning rather than failing the
    /// whole read; a ledger must stay consumable even if one write was
    /// interrupted.
    pub fn read_day(&self, day: NaiveDate) -> Result<Vec<DeliveryRecord>, LedgerError> {
        let path = self.partition_path(day);
        if !path.exists() {
            return Err(LedgerError::MissingLogFile(day));
        }

        let reader = BufReader::new(std::fs::File::open(path)?);
        let mut records = Vec::new();
        for (number, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<DeliveryRecord>(&line) {
                Ok(record) => records.push(record),
                Err(error) => {
                    warn!(day = %day, line = number + 1, %error, "Skipping malformed ledger line");
                }
            }
        }
        Ok(records)
    }

    /// Count the day's records attributed to a sender.
    ///
    /// A missing partition counts as zero sends; the caller is asking "how
    /// many so far today", and before the first send there is no file.
    #[must_use]
    pub fn sent_count(&self, day: NaiveDate, sender_email: &str) -> u32 {
        match self.read_day(day) {
            Ok(records) => {
                let count = records
                    .iter()
                    .filter(|record| record.sender.email == sender_email)
                    .count();
                u32::try_from(count).unwrap_or(u32::MAX)
            }
            Err(LedgerError::MissingLogFile(_)) => 0,
            Err(error) => {
                warn!(%error, "Failed to read ledger for sent count, treating as zero");
                0
            }
        }
    }

    /// Today's partition key.
    #[must_use]
    pub fn today() -> NaiveDate {
        Local::now().date_naive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(sender: &str, receiver: &str, thread_number: u32) -> DeliveryRecord {
        DeliveryRecord {
            sender: SenderLine {
                name: "warm".to_string(),
                email: sender.to_string(),
                email_provider: Provider::Gmail,
                send_max_emails_per_day: 10,
                total_number_of_sent_mails: thread_number,
            },
            receiver: ReceiverLine {
                name: "pool".to_string(),
                email: receiver.to_string(),
                email_provider: Provider::Outlook,
            },
            mail_sent_status: true,
            template_subject: "Quick question".to_string(),
            message_id: None,
            thread_number,
            date: String::new(),
            time: String::new(),
            datetime: String::new(),
            msg: "Mail Sent Successfully from Warmup Email to User.".to_string(),
            body: "<b>hi</b>".to_string(),
        }
        .stamped()
    }

    #[test]
    fn append_then_read_roundtrips() {
        let dir = tempfile::tempdir().expect("tempdir");
        let ledger = Ledger::open(dir.path()).expect("open ledger");
        let day = NaiveDate::from_ymd_opt(2026, 8, 30).expect("valid date");

        ledger.append(day, &record("a@x.com", "b@y.com", 1)).expect("append");
        ledger.append(day, &record("a@x.com", "c@z.com", 2)).expect("append");

        let records = ledger.read_day(day).expect("read day");
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].thread_number, 1);
        assert_eq!(records[1].receiver.email, "c@z.com");
    }

    #[test]
    fn missing_day_is_a_distinct_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let ledger = Ledger::open(dir.path()).expect("open ledger");
        let day = NaiveDate::from_ymd_opt(2026, 1, 1).expect("valid date");

        assert!(matches!(
            ledger.read_day(day),
            Err(LedgerError::MissingLogFile(d)) if d == day
        ));
    }

    #[test]
    fn sent_count_filters_by_sender_and_tolerates_missing_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let ledger = Ledger::open(dir.path()).expect("open ledger");
        let day = NaiveDate::from_ymd_opt(2026, 8, 30).expect("valid date");

        assert_eq!(ledger.sent_count(day, "a@x.com"), 0);

        ledger.append(day, &record("a@x.com", "b@y.com", 1)).expect("append");
        ledger.append(day, &record("other@x.com", "b@y.com", 1)).expect("append");
        ledger.append(day, &record("a@x.com", "c@z.com", 2)).expect("append");

        assert_eq!(ledger.sent_count(day, "a@x.com"), 2);
        assert_eq!(ledger.sent_count(day, "other@x.com"), 1);
        assert_eq!(ledger.sent_count(day, "nobody@x.com"), 0);
    }

    #[test]
    fn malformed_lines_are_skipped() {
        let dir = tempfile::tempdir().expect("tempdir");
        let ledger = Ledger::open(dir.path()).expect("open ledger");
        let day = NaiveDate::from_ymd_opt(2026, 8, 30).expect("valid date");

        ledger.append(day, &record("a@x.com", "b@y.com", 1)).expect("append");
        std::fs::write(
            dir.path().join("2026-08-30_records.log"),
            "not json\n".to_string()
                + &serde_json::to_string(&record("a@x.com", "b@y.com", 2)).expect("serialize")
                + "\n",
        )
        .expect("rewrite partition");

        let records = ledger.read_day(day).expect("read day");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].thread_number, 2);
    }
}
