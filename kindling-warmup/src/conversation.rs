//! Two-party conversation state machine.
//!
//! A unit alternates between the campaign mailbox (sender turns) and
//! its pool receiver (receiver turns), consuming one template body per
//! turn. Every turn ends with a ledger line; transport failures are
//! recorded with `mail_sent_status: false` and the conversation still
//! advances. Only infrastructure failures propagate.

use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use rand::rngs::StdRng;
use tracing::{debug, warn};

use kindling_common::{
    ledger::{DeliveryRecord, Ledger, ReceiverLine, SenderLine},
    persona,
};
use kindling_transport::{MailAccount, MailTransport, OutgoingMessage};
use kindling_vault::Vault;

use crate::{
    error::WarmupError,
    pacing,
    queue::AbortReason,
    unit::{ScheduledUnit, Turn},
};

/// What one turn decided about the unit's future.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The unit advanced; schedule its next turn after `delay_secs`.
    Next { delay_secs: u64 },
    /// Every scripted step has been played.
    Done,
    /// The unit stopped early, nothing was sent this turn.
    Aborted(AbortReason),
}

/// Executes single conversation turns against a transport and ledger.
pub struct Conversation {
    transport: Arc<dyn MailTransport>,
    ledger: Arc<Ledger>,
    vault: Arc<Vault>,
    call_timeout: Duration,
    /// Shared with the engine's seed so step jitter is reproducible
    /// alongside shuffles and pairings.
    rng: Mutex<StdRng>,
}

impl Conversation {
    pub fn new(
        transport: Arc<dyn MailTransport>,
        ledger: Arc<Ledger>,
        vault: Arc<Vault>,
        call_timeout: Duration,
        rng: StdRng,
    ) -> Self {
        Self {
            transport,
            ledger,
            vault,
            call_timeout,
            rng: Mutex::new(rng),
        }
    }

    /// Run exactly one turn of `unit`'s conversation.
    ///
    /// # Errors
    ///
    /// Fails only on ledger write failure; everything a single turn can
    /// get wrong with a provider is absorbed into the recorded line.
    pub async fn advance(&self, unit: &mut ScheduledUnit) -> Result<Outcome, WarmupError> {
        if unit.is_finished() {
            return Ok(Outcome::Done);
        }

        match unit.turn {
            Turn::Sender => self.sender_turn(unit).await,
            Turn::Receiver => self.receiver_turn(unit).await,
        }
    }

    async fn sender_turn(&self, unit: &mut ScheduledUnit) -> Result<Outcome, WarmupError> {
        let today = Ledger::today();

        // Point-in-time read; two overlapping sender turns for the same
        // campaign can both pass, overshooting the cap by the number of
        // in-flight units. Accepted race, the cap is a pacing target.
        let sent = self.ledger.sent_count(today, &unit.sender.email);
        if sent >= unit.target_volume {
            debug!(
                campaign = %unit.sender.email,
                sent,
                target = unit.target_volume,
                "Daily cap reached, aborting unit"
            );
            return Ok(Outcome::Aborted(AbortReason::CapReached));
        }

        let body = persona::render(
            &unit.bodies[unit.step],
            &unit.sender.display_name,
            unit.receiver.persona_name(),
        );

        // The opening message starts a fresh thread; later sender steps
        // reply to the receiver's last message when it can be found.
        let parent = if unit.step == 0 {
            None
        } else {
            self.lookup_parent(&unit.sender, &unit.receiver.email, &unit.template_subject)
                .await
        };

        let message = OutgoingMessage {
            to: unit.receiver.email.clone(),
            subject: threaded_subject(&unit.template_subject, parent.is_some()),
            html_body: body.clone(),
            in_reply_to: parent.clone(),
        };

        let (status, msg) = match self.send(&unit.sender, &message).await {
            Ok(()) => (
                true,
                "Mail sent successfully from warmup mailbox to pool mailbox.".to_string(),
            ),
            Err(reason) => {
                warn!(
                    campaign = %unit.sender.email,
                    receiver = %unit.receiver.email,
                    %reason,
                    "Sender turn failed to submit"
                );
                (false, reason)
            }
        };

        let record = DeliveryRecord {
            sender: SenderLine {
                name: unit.sender.display_name.clone(),
                email: unit.sender.email.clone(),
                email_provider: unit.sender.provider,
                send_max_emails_per_day: unit.target_volume,
                total_number_of_sent_mails: sent + 1,
            },
            receiver: ReceiverLine {
                name: unit.receiver.persona_name().to_string(),
                email: unit.receiver.email.clone(),
                email_provider: unit.receiver.provider,
            },
            mail_sent_status: status,
            template_subject: unit.template_subject.clone(),
            message_id: parent,
            thread_number: unit.thread_number(),
            date: String::new(),
            time: String::new(),
            datetime: String::new(),
            msg,
            body,
        }
        .stamped();
        self.ledger.append(today, &record)?;

        Ok(self.advance_step(unit))
    }

    async fn receiver_turn(&self, unit: &mut ScheduledUnit) -> Result<Outcome, WarmupError> {
        let today = Ledger::today();
        let body = persona::render(
            &unit.bodies[unit.step],
            &unit.sender.display_name,
            unit.receiver.persona_name(),
        );

        let pool_sent = self.ledger.sent_count(today, &unit.receiver.email);

        let account = match self.vault.decrypt(&unit.receiver.app_password) {
            Ok(password) => MailAccount {
                email: unit.receiver.email.clone(),
                display_name: unit.receiver.persona_name().to_string(),
                app_password: password,
                provider: unit.receiver.provider,
            },
            Err(error) => {
                warn!(
                    receiver = %unit.receiver.email,
                    %error,
                    "Pool credential unusable, recording failed turn"
                );
                let record =
                    receiver_record(unit, &body, pool_sent, None, false, error.to_string())
                        .stamped();
                self.ledger.append(today, &record)?;
                return Ok(self.advance_step(unit));
            }
        };

        let parent = self
            .lookup_parent(&account, &unit.sender.email, &unit.template_subject)
            .await;

        let message = OutgoingMessage {
            to: unit.sender.email.clone(),
            subject: threaded_subject(&unit.template_subject, parent.is_some()),
            html_body: body.clone(),
            in_reply_to: parent.clone(),
        };

        let (status, msg) = match self.send(&account, &message).await {
            Ok(()) => (
                true,
                "Mail sent successfully from pool mailbox to warmup mailbox.".to_string(),
            ),
            Err(reason) => {
                warn!(
                    receiver = %unit.receiver.email,
                    campaign = %unit.sender.email,
                    %reason,
                    "Receiver turn failed to submit"
                );
                (false, reason)
            }
        };

        let record = receiver_record(unit, &body, pool_sent, parent, status, msg).stamped();
        self.ledger.append(today, &record)?;

        Ok(self.advance_step(unit))
    }

    /// Find the `Message-ID` to thread this turn under, or `None` to
    /// fall back to a fresh message (lookup misses, failures, and
    /// timeouts all degrade the same way).
    async fn lookup_parent(
        &self,
        account: &MailAccount,
        from: &str,
        subject: &str,
    ) -> Option<String> {
        let lookup = self
            .transport
            .find_latest_message_id_by_subject(account, from, subject);
        match tokio::time::timeout(self.call_timeout, lookup).await {
            Ok(Ok(found)) => found,
            Ok(Err(error)) => {
                warn!(account = %account.email, %error, "Parent lookup failed, sending fresh");
                None
            }
            Err(_) => {
                warn!(account = %account.email, "Parent lookup timed out, sending fresh");
                None
            }
        }
    }

    async fn send(&self, account: &MailAccount, message: &OutgoingMessage) -> Result<(), String> {
        match tokio::time::timeout(
            self.call_timeout,
            self.transport.send_message(account, message),
        )
        .await
        {
            Ok(Ok(())) => Ok(()),
            Ok(Err(error)) => Err(format!("Send failed: {error}")),
            Err(_) => Err("Send timed out".to_string()),
        }
    }

    fn advance_step(&self, unit: &mut ScheduledUnit) -> Outcome {
        unit.step += 1;
        unit.turn = match unit.turn {
            Turn::Sender => Turn::Receiver,
            Turn::Receiver => Turn::Sender,
        };
        if unit.is_finished() {
            Outcome::Done
        } else {
            let mut rng = self
                .rng
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            Outcome::Next {
                delay_secs: pacing::step_delay(&mut *rng, unit.one_message_delay),
            }
        }
    }
}

/// Ledger line for a receiver turn: the pool mailbox appears as the
/// sender, so these lines never count toward the campaign's cap.
fn receiver_record(
    unit: &ScheduledUnit,
    body: &str,
    pool_sent: u32,
    parent: Option<String>,
    status: bool,
    msg: String,
) -> DeliveryRecord {
    DeliveryRecord {
        sender: SenderLine {
            name: unit.receiver.persona_name().to_string(),
            email: unit.receiver.email.clone(),
            email_provider: unit.receiver.provider,
            send_max_emails_per_day: 0,
            total_number_of_sent_mails: pool_sent + 1,
        },
        receiver: ReceiverLine {
            name: unit.sender.display_name.clone(),
            email: unit.sender.email.clone(),
            email_provider: unit.sender.provider,
        },
        mail_sent_status: status,
        template_subject: unit.template_subject.clone(),
        message_id: parent,
        thread_number: unit.thread_number(),
        date: String::new(),
        time: String::new(),
        datetime: String::new(),
        msg,
        body: body.to_string(),
    }
}

/// Subject line for a turn: `Re: `-prefixed only when actually
/// threading under a parent.
fn threaded_subject(subject: &str, replying: bool) -> String {
    if replying {
        format!("Re: {subject}")
    } else {
        subject.to_string()
    }
}

