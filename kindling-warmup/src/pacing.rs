//! Delay computation spreading a day's conversations over the time budget.

use rand::Rng;

/// Base per-message delay for a schedule: the time budget divided by
/// the longest template's step count, shaved by 2% so the final step
/// lands inside the budget.
#[must_use]
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_precision_loss,
    clippy::cast_sign_loss
)]
pub fn one_message_delay(max_time_budget_secs: u64, max_step_count: u32) -> u64 {
    if max_step_count == 0 {
        return 1;
    }
    let delay = (max_time_budget_secs as f64 / f64::from(max_step_count) * 0.98).floor() as u64;
    delay.max(1)
}

/// Cold-start delay before a unit's first step.
pub fn initial_delay<R: Rng>(rng: &mut R, one_message_delay: u64) -> u64 {
    rng.random_range(1..=one_message_delay.max(1))
}

/// Delay between consecutive steps of one conversation.
pub fn step_delay<R: Rng>(rng: &mut R, one_message_delay: u64) -> u64 {
    let delay = one_message_delay.max(1);
    let floor = (delay * 3 / 4).max(1);
    rng.random_range(floor..=delay)
}
