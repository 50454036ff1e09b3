//! Scheduled conversation units.

use ulid::Ulid;

use kindling_common::model::PoolMailbox;
use kindling_transport::MailAccount;

/// Unique identifier for one scheduled conversation unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UnitId(Ulid);

impl UnitId {
    #[must_use]
    pub fn generate() -> Self {
        Self(Ulid::new())
    }
}

impl Default for UnitId {
    fn default() -> Self {
        Self::generate()
    }
}

impl std::fmt::Display for UnitId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Whose move it is within a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Turn {
    /// The warmed-up campaign mailbox speaks next.
    Sender,
    /// The pool mailbox replies next.
    Receiver,
}

/// One campaign-to-pool conversation, scheduled for today.
///
/// Units are ephemeral: they exist only in the work queue and are
/// rebuilt by the next daily cycle. The sender's credentials are
/// already decrypted; the receiver's stay encrypted until its first
/// turn, so a broken pool credential cannot block scheduling.
#[derive(Debug, Clone)]
pub struct ScheduledUnit {
    pub id: UnitId,
    /// Campaign mailbox acting as the initiating party.
    pub sender: MailAccount,
    /// Pool mailbox acting as the replying party.
    pub receiver: PoolMailbox,
    pub template_subject: String,
    /// Step bodies in conversation order; consumed one per turn.
    pub bodies: Vec<String>,
    /// Next step to play, 0-based. `bodies.len()` means finished.
    pub step: usize,
    pub turn: Turn,
    /// Base pacing delay in seconds for this campaign's schedule.
    pub one_message_delay: u64,
    /// Today's sender-initiated send cap for the campaign.
    pub target_volume: u32,
}

impl ScheduledUnit {
    /// Whether every scripted step has been played.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.step >= self.bodies.len()
    }

    /// 1-based position of the current step within the thread.
    #[must_use]
    pub fn thread_number(&self) -> u32 {
        u32::try_from(self.step + 1).unwrap_or(u32::MAX)
    }
}
