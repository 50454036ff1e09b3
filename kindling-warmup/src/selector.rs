//! Template selection and receiver pairing for one campaign's day.

use rand::{seq::SliceRandom, Rng};

use kindling_common::model::{PoolMailbox, Template};

/// The templates chosen to fill a campaign's daily volume.
#[derive(Debug, Clone)]
pub struct ScheduleSet {
    pub templates: Vec<Template>,
    /// Largest step count among the chosen templates; drives pacing.
    pub max_step_count: u32,
}

/// Pick templates to cover `target_volume` sender-initiated messages.
///
/// The pool is shuffled once, then walked cyclically, accumulating each
/// template's step count until the running total exceeds
/// `2 * target - 2`. A template may therefore be scheduled more than
/// once when the pool is small. Zero-step templates are discarded up
/// front so the walk always terminates.
pub fn build_schedule_set<R: Rng>(
    templates: Vec<Template>,
    target_volume: u32,
    rng: &mut R,
) -> ScheduleSet {
    let mut pool: Vec<Template> = templates
        .into_iter()
        .filter(|template| template.step_count() > 0)
        .collect();
    if pool.is_empty() {
        return ScheduleSet {
            templates: Vec::new(),
            max_step_count: 0,
        };
    }

    pool.shuffle(rng);

    let limit = u64::from(target_volume).saturating_mul(2).saturating_sub(2);
    let mut selected = Vec::new();
    let mut accumulated: u64 = 0;
    let mut cursor = 0;
    while accumulated <= limit {
        let template = pool[cursor % pool.len()].clone();
        accumulated += u64::from(template.step_count());
        selected.push(template);
        cursor += 1;
    }

    let max_step_count = selected
        .iter()
        .map(Template::step_count)
        .max()
        .unwrap_or(0);

    ScheduleSet {
        templates: selected,
        max_step_count,
    }
}

/// Pair each scheduled template with a distinct pool receiver.
///
/// The template list is truncated to the pool size first; every
/// receiver hosts at most one conversation per campaign per day.
pub fn assign_receivers<R: Rng>(
    mut templates: Vec<Template>,
    pool: &[PoolMailbox],
    rng: &mut R,
) -> Vec<(Template, PoolMailbox)> {
    templates.truncate(pool.len());
    let picks = rand::seq::index::sample(rng, pool.len(), templates.len());
    templates
        .into_iter()
        .zip(picks.iter().map(|index| pool[index].clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    use rand::{rngs::StdRng, SeedableRng};

    use kindling_common::model::{Provider, ThreadStep};

    fn template(name: &str, steps: u32) -> Template {
        Template {
            name: name.to_string(),
            subject: format!("{name} subject"),
            scope: None,
            is_general: true,
            is_selected: true,
            steps: (1..=steps)
                .map(|ordinal| ThreadStep {
                    ordinal,
                    body: format!("body {ordinal}"),
                })
                .collect(),
        }
    }

    fn mailbox(email: &str) -> PoolMailbox {
        PoolMailbox {
            email: email.to_string(),
            provider: Provider::Gmail,
            app_password: "ciphertext".to_string(),
            active: true,
        }
    }

    #[test]
    fn accumulation_stays_within_bounds() {
        let mut rng = StdRng::seed_from_u64(11);
        for target in [2_u32, 5, 10, 25] {
            let set = build_schedule_set(
                vec![template("a", 3), template("b", 4), template("c", 6)],
                target,
                &mut rng,
            );
            let sum: u64 = set
                .templates
                .iter()
                .map(|t| u64::from(t.step_count()))
                .sum();
            let lower = u64::from(target) * 2 - 1;
            let upper = u64::from(target) * 2 - 2 + u64::from(set.max_step_count);
            assert!(sum >= lower, "sum {sum} below {lower} for target {target}");
            assert!(sum <= upper, "sum {sum} above {upper} for target {target}");
        }
    }

    #[test]
    fn single_template_input_terminates_by_repetition() {
        let mut rng = StdRng::seed_from_u64(3);
        let set = build_schedule_set(vec![template("solo", 4)], 10, &mut rng);
        assert!(set.templates.len() >= 5);
        assert!(set.templates.iter().all(|t| t.name == "solo"));
        assert_eq!(set.max_step_count, 4);
    }

    #[test]
    fn zero_step_templates_are_discarded() {
        let mut rng = StdRng::seed_from_u64(3);
        let set = build_schedule_set(vec![template("empty", 0)], 10, &mut rng);
        assert!(set.templates.is_empty());
        assert_eq!(set.max_step_count, 0);
    }

    #[test]
    fn receivers_are_unique_and_pairing_is_bounded() {
        let mut rng = StdRng::seed_from_u64(19);
        let templates: Vec<Template> = (0..8).map(|i| template(&format!("t{i}"), 3)).collect();
        let pool: Vec<PoolMailbox> = (0..5).map(|i| mailbox(&format!("p{i}@x.com"))).collect();

        let pairs = assign_receivers(templates, &pool, &mut rng);
        assert_eq!(pairs.len(), 5);

        let receivers: HashSet<&str> = pairs.iter().map(|(_, r)| r.email.as_str()).collect();
        assert_eq!(receivers.len(), pairs.len());
    }

    #[test]
    fn pairing_with_empty_pool_is_empty() {
        let mut rng = StdRng::seed_from_u64(19);
        let pairs = assign_receivers(vec![template("a", 2)], &[], &mut rng);
        assert!(pairs.is_empty());
    }

    #[test]
    fn seeded_selection_is_deterministic() {
        let templates = vec![template("a", 3), template("b", 4), template("c", 6)];
        let first = {
            let mut rng = StdRng::seed_from_u64(42);
            build_schedule_set(templates.clone(), 6, &mut rng)
        };
        let second = {
            let mut rng = StdRng::seed_from_u64(42);
            build_schedule_set(templates, 6, &mut rng)
        };
        let names = |set: &ScheduleSet| {
            set.templates
                .iter()
                .map(|t| t.name.clone())
                .collect::<Vec<_>>()
        };
        assert_eq!(names(&first), names(&second));
    }
}
