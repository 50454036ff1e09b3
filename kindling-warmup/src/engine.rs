//! Daily scheduling engine.
//!
//! One cycle per day builds conversation units for every eligible
//! campaign; a serve loop then drains due units, advancing each
//! conversation one turn at a time. Campaigns are scheduled in
//! isolation, so one broken campaign never blocks the rest of a cycle.

use std::{
    sync::Arc,
    time::{Duration, SystemTime},
};

use rand::{rngs::StdRng, SeedableRng};
use serde::Deserialize;
use tokio::task::JoinSet;
use tracing::{debug, error, warn};

use kindling_common::{
    internal,
    ledger::Ledger,
    model::{Campaign, PoolMailbox},
    store::{CampaignStore, PoolStore, TemplateStore},
    Signal,
};
use kindling_transport::{MailAccount, MailTransport};
use kindling_vault::Vault;

use crate::{
    conversation::{Conversation, Outcome},
    error::WarmupError,
    pacing,
    queue::WorkQueue,
    selector,
    unit::{ScheduledUnit, Turn, UnitId},
};

const fn default_process_interval() -> u64 {
    10
}

const fn default_max_time_budget() -> u64 {
    72000 // 20 hours
}

const fn default_transport_timeout() -> u64 {
    60
}

/// Engine tuning, deserialized from the service config.
#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    /// How often to drain due conversation units (in seconds)
    #[serde(default = "default_process_interval")]
    pub process_interval_secs: u64,

    /// Wall-clock budget one campaign's day of conversations may span
    /// (in seconds). Divided by the longest template to pace steps.
    #[serde(default = "default_max_time_budget")]
    pub max_time_budget_secs: u64,

    /// Timeout applied to every individual provider call (in seconds)
    #[serde(default = "default_transport_timeout")]
    pub transport_timeout_secs: u64,

    /// Fixed seed for selection and pacing randomness.
    ///
    /// `None` (the default) draws entropy from the OS; setting a seed
    /// makes template shuffles and receiver pairings reproducible.
    #[serde(default)]
    pub rng_seed: Option<u64>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            process_interval_secs: default_process_interval(),
            max_time_budget_secs: default_max_time_budget(),
            transport_timeout_secs: default_transport_timeout(),
            rng_seed: None,
        }
    }
}

/// What one daily cycle accomplished.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleSummary {
    pub scheduled_units: usize,
    pub scheduled_campaigns: usize,
    pub failed_campaigns: usize,
}

/// Orchestrates daily scheduling and conversation execution.
pub struct WarmupEngine {
    config: EngineConfig,
    campaigns: Arc<dyn CampaignStore>,
    pool: Arc<dyn PoolStore>,
    templates: Arc<dyn TemplateStore>,
    vault: Arc<Vault>,
    queue: WorkQueue,
    conversation: Arc<Conversation>,
}

impl WarmupEngine {
    pub fn new(
        config: EngineConfig,
        campaigns: Arc<dyn CampaignStore>,
        pool: Arc<dyn PoolStore>,
        templates: Arc<dyn TemplateStore>,
        vault: Arc<Vault>,
        transport: Arc<dyn MailTransport>,
        ledger: Arc<Ledger>,
    ) -> Self {
        let conversation = Arc::new(Conversation::new(
            transport,
            ledger,
            Arc::clone(&vault),
            Duration::from_secs(config.transport_timeout_secs),
            config
                .rng_seed
                .map_or_else(StdRng::from_os_rng, StdRng::seed_from_u64),
        ));
        Self {
            config,
            campaigns,
            pool,
            templates,
            vault,
            queue: WorkQueue::new(),
            conversation,
        }
    }

    /// The engine's work queue, for introspection.
    #[must_use]
    pub const fn queue(&self) -> &WorkQueue {
        &self.queue
    }

    /// Build and enqueue today's conversation units.
    ///
    /// Per-campaign failures are logged and counted, never propagated;
    /// only store access for the campaign and pool listings can fail
    /// the cycle itself.
    ///
    /// # Errors
    ///
    /// Returns an error if the campaign or pool listing cannot be read.
    pub async fn run_daily_cycle(&self) -> Result<CycleSummary, WarmupError> {
        internal!("Running daily warmup cycle");

        let campaigns = self.campaigns.eligible_campaigns().await?;
        let pool = self.pool.active_mailboxes().await?;

        let mut summary = CycleSummary::default();
        if pool.is_empty() {
            // Campaigns are still visited: counters step up every cycle
            // whether or not anyone is available to converse with, so
            // paced volumes stay on schedule across pool outages.
            warn!("Receiver pool is empty, scheduling no conversations");
        }

        for campaign in campaigns {
            match self.schedule_campaign(&campaign, &pool).await {
                Ok(scheduled) => {
                    summary.scheduled_units += scheduled;
                    summary.scheduled_campaigns += 1;
                }
                Err(error) => {
                    error!(campaign = %campaign.email, %error, "Failed to schedule campaign");
                    summary.failed_campaigns += 1;
                }
            }
        }

        internal!(
            "Daily cycle scheduled {} units across {} campaigns ({} failed)",
            summary.scheduled_units,
            summary.scheduled_campaigns,
            summary.failed_campaigns
        );
        Ok(summary)
    }

    async fn schedule_campaign(
        &self,
        campaign: &Campaign,
        pool: &[PoolMailbox],
    ) -> Result<usize, WarmupError> {
        let Some(ciphertext) = campaign.app_password.as_deref() else {
            return Err(WarmupError::Config(format!(
                "Campaign {} has no stored app password",
                campaign.email
            )));
        };
        let password = self.vault.decrypt(ciphertext)?;

        // Step the counter up while below the ceiling. The check runs
        // before the increment, so a campaign sitting just under the
        // cap overshoots it once (48 with step 5 and cap 50 lands on
        // 53) and stays there.
        let mut target = campaign.mails_to_send;
        if target < campaign.max_per_day {
            target += campaign.step_up;
            self.campaigns
                .set_mails_to_send(&campaign.email, target)
                .await?;
        }

        let mut candidates = self.templates.scoped_selected(&campaign.email).await?;
        if candidates.is_empty() {
            candidates = self.templates.general().await?;
        }
        if candidates.is_empty() {
            debug!(campaign = %campaign.email, "No templates available, skipping");
            return Ok(0);
        }

        let mut rng = self.rng();
        let schedule = selector::build_schedule_set(candidates, target, &mut rng);
        if schedule.templates.is_empty() {
            debug!(campaign = %campaign.email, "Every candidate template is empty, skipping");
            return Ok(0);
        }

        let delay =
            pacing::one_message_delay(self.config.max_time_budget_secs, schedule.max_step_count);
        let pairs = selector::assign_receivers(schedule.templates, pool, &mut rng);

        let sender = MailAccount {
            email: campaign.email.clone(),
            display_name: campaign.persona_name().to_string(),
            app_password: password,
            provider: campaign.provider,
        };

        let scheduled = pairs.len();
        for (template, receiver) in pairs {
            let start = pacing::initial_delay(&mut rng, delay);
            let unit = ScheduledUnit {
                id: UnitId::generate(),
                sender: sender.clone(),
                receiver,
                template_subject: template.subject.clone(),
                bodies: template.bodies(),
                step: 0,
                turn: Turn::Sender,
                one_message_delay: delay,
                target_volume: target,
            };
            self.queue
                .enqueue(unit, SystemTime::now() + Duration::from_secs(start));
        }

        debug!(
            campaign = %campaign.email,
            scheduled,
            target,
            base_delay = delay,
            "Scheduled campaign units"
        );
        Ok(scheduled)
    }

    /// Run the engine until a shutdown signal arrives.
    ///
    /// Drains due units on every process tick; the daily cycle is
    /// driven separately by the controller's cycle timer.
    ///
    /// # Errors
    ///
    /// Currently infallible after startup; kept fallible for parity
    /// with the other serve loops the controller selects over.
    pub async fn serve(
        &self,
        mut shutdown: tokio::sync::broadcast::Receiver<Signal>,
    ) -> Result<(), WarmupError> {
        internal!("Warmup engine starting");

        let mut process_timer =
            tokio::time::interval(Duration::from_secs(self.config.process_interval_secs));

        // Skip the first tick to avoid immediate execution
        process_timer.tick().await;

        loop {
            tokio::select! {
                _ = process_timer.tick() => {
                    self.process_due_units().await;
                }
                sig = shutdown.recv() => {
                    match sig {
                        Ok(Signal::Shutdown | Signal::Finalised) => {
                            internal!("Warmup engine received shutdown signal");
                            break;
                        }
                        Err(error) => {
                            error!(%error, "Warmup engine shutdown channel error");
                            break;
                        }
                    }
                }
            }
        }

        Ok(())
    }

    /// Advance every due unit one turn, in parallel.
    pub async fn process_due_units(&self) {
        let due = self.queue.due_units(SystemTime::now());
        if due.is_empty() {
            return;
        }
        debug!(count = due.len(), "Advancing due conversation units");

        let mut tasks = JoinSet::new();
        for mut unit in due {
            let conversation = Arc::clone(&self.conversation);
            let queue = self.queue.clone();
            tasks.spawn(async move {
                let id = unit.id;
                match conversation.advance(&mut unit).await {
                    Ok(Outcome::Next { delay_secs }) => {
                        queue.reschedule(unit, SystemTime::now() + Duration::from_secs(delay_secs));
                    }
                    Ok(Outcome::Done) => queue.complete(id),
                    Ok(Outcome::Aborted(reason)) => queue.abort(id, reason),
                    Err(error) => {
                        error!(unit = %id, %error, "Conversation turn failed, retrying after base delay");
                        let delay = Duration::from_secs(unit.one_message_delay);
                        queue.reschedule(unit, SystemTime::now() + delay);
                    }
                }
            });
        }
        while let Some(joined) = tasks.join_next().await {
            if let Err(error) = joined {
                error!(%error, "Conversation task died before reporting back");
            }
        }

        // Every task has joined, so any entry still in flight belongs
        // to one that panicked between taking the unit and writing its
        // outcome back. Requeue those for the next processing pass.
        let retry_at = SystemTime::now() + Duration::from_secs(self.config.process_interval_secs);
        let recovered = self.queue.reschedule_in_flight(retry_at);
        if recovered > 0 {
            warn!(count = recovered, "Recovered units orphaned by dead tasks");
        }
    }

    fn rng(&self) -> StdRng {
        self.config
            .rng_seed
            .map_or_else(StdRng::from_os_rng, StdRng::seed_from_u64)
    }
}
