//! Mailbox warmup core: daily scheduling, template selection, pacing,
//! and the two-party conversation state machine.

pub mod conversation;
pub mod engine;
pub mod error;
pub mod pacing;
pub mod queue;
pub mod selector;
pub mod unit;

pub use conversation::{Conversation, Outcome};
pub use engine::{CycleSummary, EngineConfig, WarmupEngine};
pub use error::{SystemError, WarmupError};
pub use queue::{AbortReason, UnitStatus, WorkQueue};
pub use unit::{ScheduledUnit, Turn, UnitId};
