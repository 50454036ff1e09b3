//! Service wiring and lifecycle.
//!
//! The controller is deserialized straight from the service config,
//! builds every collaborator once, and then selects over the long
//! running jobs until a shutdown signal arrives.

use std::{
    path::PathBuf,
    sync::{Arc, LazyLock},
    time::Duration,
};

use anyhow::Context;
use serde::Deserialize;
use tokio::sync::broadcast;
use tracing::error;

use kindling_common::{
    internal,
    ledger::Ledger,
    logging,
    model::{Account, Campaign, PoolMailbox, Provider, Template},
    store::MemoryStore,
    Signal,
};
use kindling_report::{Aggregator, Notifier, ReportConfig};
use kindling_transport::{LiveTransport, MailAccount, MailTransport};
use kindling_vault::Vault;
use kindling_warmup::{EngineConfig, WarmupEngine};

use crate::{
    heartbeat,
    notify::{LogNotifier, MailNotifier},
};

pub static SHUTDOWN_BROADCAST: LazyLock<broadcast::Sender<Signal>> = LazyLock::new(|| {
    let (sender, _receiver) = broadcast::channel(64);
    sender
});

fn default_ledger_dir() -> PathBuf {
    PathBuf::from("./kindling-ledger")
}

const fn default_cycle_interval() -> u64 {
    86400
}

const fn default_report_interval() -> u64 {
    86400
}

/// Dedicated mailbox alerts are sent from.
#[derive(Debug, Clone, Deserialize)]
pub struct AlertMailbox {
    pub email: String,
    #[serde(default)]
    pub display_name: Option<String>,
    /// Provider app password, in the clear. The alert mailbox is a
    /// service credential, not a customer one, so it lives in the
    /// config next to the vault passphrase.
    pub app_password: String,
    pub provider: Provider,
}

impl AlertMailbox {
    fn into_account(self) -> MailAccount {
        let display_name = self
            .display_name
            .unwrap_or_else(|| kindling_common::model::local_part(&self.email).to_string());
        MailAccount {
            email: self.email,
            display_name,
            app_password: self.app_password,
            provider: self.provider,
        }
    }
}

#[derive(Deserialize)]
pub struct Kindling {
    /// Vault passphrase; the `KINDLING_PASSPHRASE` environment variable
    /// takes precedence so the config file can omit it entirely.
    #[serde(default)]
    passphrase: Option<String>,

    #[serde(default = "default_ledger_dir")]
    ledger_dir: PathBuf,

    #[serde(default)]
    engine: EngineConfig,

    #[serde(default)]
    report: ReportConfig,

    /// Seconds between daily scheduling cycles. The first cycle runs at
    /// startup.
    #[serde(default = "default_cycle_interval")]
    cycle_interval_secs: u64,

    /// Seconds between report aggregation runs.
    #[serde(default = "default_report_interval")]
    report_interval_secs: u64,

    /// Uptime heartbeat on a dedicated OS thread. Off unless asked for.
    #[serde(default)]
    heartbeat: bool,

    #[serde(alias = "alert", default)]
    alert_mailbox: Option<AlertMailbox>,

    /// Seed data loaded into the store at startup. Password fields on
    /// campaigns and pool mailboxes are vault ciphertext.
    #[serde(alias = "campaign", default)]
    campaigns: Vec<Campaign>,
    #[serde(alias = "pool", default)]
    pool: Vec<PoolMailbox>,
    #[serde(alias = "template", default)]
    templates: Vec<Template>,
    #[serde(alias = "account", default)]
    accounts: Vec<Account>,
}

impl Kindling {
    /// Run the service until it is told to stop.
    ///
    /// # Errors
    ///
    /// Returns an error if no vault passphrase is available, the ledger
    /// directory cannot be created, or signal handlers fail to install.
    pub async fn run(self) -> anyhow::Result<()> {
        logging::init();

        let passphrase = std::env::var("KINDLING_PASSPHRASE")
            .ok()
            .or(self.passphrase)
            .context("No vault passphrase: set KINDLING_PASSPHRASE or `passphrase` in the config")?;
        let vault = Arc::new(Vault::new(&passphrase)?);
        let ledger = Arc::new(Ledger::open(&self.ledger_dir)?);
        let transport: Arc<dyn MailTransport> = Arc::new(LiveTransport::new());

        let store = MemoryStore::new();
        for campaign in self.campaigns {
            store.insert_campaign(campaign);
        }
        for mailbox in self.pool {
            store.insert_pool_mailbox(mailbox);
        }
        for template in self.templates {
            store.insert_template(template);
        }
        for account in self.accounts {
            store.insert_account(account);
        }

        let engine = WarmupEngine::new(
            self.engine,
            Arc::new(store.clone()),
            Arc::new(store.clone()),
            Arc::new(store.clone()),
            Arc::clone(&vault),
            Arc::clone(&transport),
            Arc::clone(&ledger),
        );

        let notifier: Arc<dyn Notifier> = match self.alert_mailbox {
            Some(mailbox) => Arc::new(MailNotifier::new(
                Arc::clone(&transport),
                mailbox.into_account(),
            )),
            None => Arc::new(LogNotifier),
        };

        let aggregator = Aggregator::new(
            Arc::new(store.clone()),
            Arc::new(store.clone()),
            Arc::new(store.clone()),
            Arc::new(store),
            vault,
            transport,
            ledger,
            notifier,
            self.report,
        );

        if self.heartbeat {
            heartbeat::start();
        }

        internal!("Controller running");

        let ret = tokio::select! {
            r = engine.serve(SHUTDOWN_BROADCAST.subscribe()) => {
                r.map_err(Into::into)
            }
            r = cycle_job(&engine, self.cycle_interval_secs, SHUTDOWN_BROADCAST.subscribe()) => {
                r
            }
            r = report_job(&aggregator, self.report_interval_secs, SHUTDOWN_BROADCAST.subscribe()) => {
                r
            }
            r = shutdown() => {
                r
            }
        };

        internal!("Shutting down...");

        ret
    }
}

/// Schedule a cycle now and then on every interval tick.
///
/// Cycle failures are logged and the timer keeps running; a transient
/// store outage today must not stop tomorrow's scheduling.
async fn cycle_job(
    engine: &WarmupEngine,
    interval_secs: u64,
    mut shutdown: broadcast::Receiver<Signal>,
) -> anyhow::Result<()> {
    let mut timer = tokio::time::interval(Duration::from_secs(interval_secs));

    loop {
        tokio::select! {
            _ = timer.tick() => {
                match engine.run_daily_cycle().await {
                    Ok(summary) => internal!(
                        "Cycle done: {} units, {} campaigns, {} failed",
                        summary.scheduled_units,
                        summary.scheduled_campaigns,
                        summary.failed_campaigns
                    ),
                    Err(error) => error!(%error, "Daily cycle failed"),
                }
            }
            _ = shutdown.recv() => break,
        }
    }

    Ok(())
}

/// Aggregate the current day's ledger and recompute ratios on a timer.
async fn report_job(
    aggregator: &Aggregator,
    interval_secs: u64,
    mut shutdown: broadcast::Receiver<Signal>,
) -> anyhow::Result<()> {
    let mut timer = tokio::time::interval(Duration::from_secs(interval_secs));

    // Skip the first tick to avoid immediate execution
    timer.tick().await;

    loop {
        tokio::select! {
            _ = timer.tick() => {
                let day = Ledger::today();
                if let Err(error) = aggregator.build_reports(day).await {
                    error!(%error, %day, "Report aggregation failed");
                    continue;
                }
                if let Err(error) = aggregator.compute_ratios_and_alert(day).await {
                    error!(%error, %day, "Ratio computation failed");
                }
            }
            _ = shutdown.recv() => break,
        }
    }

    Ok(())
}

async fn shutdown() -> anyhow::Result<()> {
    let mut terminate = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            internal!("CTRL+C entered -- Enter it again to force shutdown");
        }
        _ = terminate.recv() => {
            internal!("Terminate Signal received, shutting down");
        }
    };

    let mut receiver = SHUTDOWN_BROADCAST.subscribe();

    SHUTDOWN_BROADCAST
        .send(Signal::Shutdown)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Interrupted, e.to_string()))?;

    loop {
        tokio::select! {
            sig = receiver.recv() => {
                match sig {
                    Ok(s) => tracing::debug!("Received {s:?}"),
                    Err(broadcast::error::RecvError::Closed) => break,
                    Err(e) => tracing::debug!("Received: {e:?}"),
                }
            }

            _ = tokio::signal::ctrl_c() => {
                break;
            }
        }
    }

    Ok(())
}
