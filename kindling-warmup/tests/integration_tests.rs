//! Integration tests for the warmup engine and conversation machine.

use std::{sync::Arc, time::Duration};

use rand::{rngs::StdRng, SeedableRng};
use uuid::Uuid;

use kindling_common::{
    ledger::Ledger,
    model::{ActionRequired, Campaign, PoolMailbox, Provider, Template, ThreadStep},
    store::{CampaignStore, MemoryStore},
};
use kindling_transport::{MailAccount, MockTransport};
use kindling_vault::Vault;
use kindling_warmup::{
    AbortReason, Conversation, EngineConfig, Outcome, ScheduledUnit, Turn, UnitId, UnitStatus,
    WarmupEngine,
};

fn vault() -> Arc<Vault> {
    Arc::new(Vault::new("integration passphrase").unwrap())
}

fn campaign(vault: &Vault, email: &str, mails_to_send: u32, max_per_day: u32) -> Campaign {
    Campaign {
        email: email.to_string(),
        provider: Provider::Gmail,
        app_password: Some(vault.encrypt("sender app password").unwrap()),
        mails_to_send,
        max_per_day,
        step_up: 5,
        paused: false,
        cancelled: false,
        action_required: ActionRequired::None,
        owner_id: Uuid::new_v4(),
        display_name: Some("Morgan".to_string()),
    }
}

fn pool_mailbox(vault: &Vault, email: &str) -> PoolMailbox {
    PoolMailbox {
        email: email.to_string(),
        provider: Provider::Outlook,
        app_password: vault.encrypt("pool app password").unwrap(),
        active: true,
    }
}

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
                body: format!("Hi {{{{test_user2}}}}, step {ordinal} from {{{{test_user1}}}}."),
            })
            .collect(),
    }
}

fn unit(
    vault: &Vault,
    campaign_email: &str,
    pool_email: &str,
    steps: u32,
    target_volume: u32,
) -> ScheduledUnit {
    ScheduledUnit {
        id: UnitId::generate(),
        sender: MailAccount {
            email: campaign_email.to_string(),
            display_name: "Morgan".to_string(),
            app_password: "sender app password".to_string(),
            provider: Provider::Gmail,
        },
        receiver: pool_mailbox(vault, pool_email),
        template_subject: "Quick question".to_string(),
        bodies: (1..=steps).map(|i| format!("step {i} body")).collect(),
        step: 0,
        turn: Turn::Sender,
        one_message_delay: 4,
        target_volume,
    }
}

fn conversation(transport: &MockTransport, ledger: Arc<Ledger>, vault: Arc<Vault>) -> Conversation {
    Conversation::new(
        Arc::new(transport.clone()),
        ledger,
        vault,
        Duration::from_secs(5),
        StdRng::seed_from_u64(5),
    )
}

#[tokio::test]
async fn test_counter_step_up_keeps_historical_overshoot() {
    let vault = vault();
    let store = MemoryStore::new();
    store.insert_campaign(campaign(&vault, "near@x.com", 48, 50));
    store.insert_campaign(campaign(&vault, "at@x.com", 50, 50));
    store.insert_pool_mailbox(pool_mailbox(&vault, "pool@y.com"));
    store.insert_template(template("intro", 2));

    let dir = tempfile::tempdir().unwrap();
    let engine = WarmupEngine::new(
        EngineConfig {
            rng_seed: Some(1),
            ..EngineConfig::default()
        },
        Arc::new(store.clone()),
        Arc::new(store.clone()),
        Arc::new(store.clone()),
        vault,
        Arc::new(MockTransport::new()),
        Arc::new(Ledger::open(dir.path()).unwrap()),
    );

    engine.run_daily_cycle().await.unwrap();

    // 48 steps past the cap once; 50 stays put.
    let near = store.get_campaign("near@x.com").await.unwrap().unwrap();
    assert_eq!(near.mails_to_send, 53);
    let at = store.get_campaign("at@x.com").await.unwrap().unwrap();
    assert_eq!(at.mails_to_send, 50);
}

#[tokio::test]
async fn test_counter_steps_up_even_when_pool_is_empty() {
    let vault = vault();
    let store = MemoryStore::new();
    store.insert_campaign(campaign(&vault, "warm@x.com", 2, 50));
    store.insert_template(template("intro", 2));
    // No pool mailboxes at all.

    let dir = tempfile::tempdir().unwrap();
    let engine = WarmupEngine::new(
        EngineConfig {
            rng_seed: Some(1),
            ..EngineConfig::default()
        },
        Arc::new(store.clone()),
        Arc::new(store.clone()),
        Arc::new(store.clone()),
        vault,
        Arc::new(MockTransport::new()),
        Arc::new(Ledger::open(dir.path()).unwrap()),
    );

    let summary = engine.run_daily_cycle().await.unwrap();

    // Nothing to schedule, but the pacing counter still advances.
    assert_eq!(summary.scheduled_units, 0);
    let campaign = store.get_campaign("warm@x.com").await.unwrap().unwrap();
    assert_eq!(campaign.mails_to_send, 7);
}

#[tokio::test]
async fn test_cycle_schedules_only_eligible_campaigns() {
    let vault = vault();
    let store = MemoryStore::new();
    store.insert_campaign(campaign(&vault, "ok@x.com", 2, 50));
    let mut paused = campaign(&vault, "paused@x.com", 2, 50);
    paused.paused = true;
    store.insert_campaign(paused);
    let mut blocked = campaign(&vault, "blocked@x.com", 2, 50);
    blocked.action_required = ActionRequired::AppPassword;
    store.insert_campaign(blocked);
    store.insert_pool_mailbox(pool_mailbox(&vault, "pool@y.com"));
    store.insert_template(template("intro", 2));

    let dir = tempfile::tempdir().unwrap();
    let engine = WarmupEngine::new(
        EngineConfig {
            rng_seed: Some(1),
            ..EngineConfig::default()
        },
        Arc::new(store.clone()),
        Arc::new(store.clone()),
        Arc::new(store.clone()),
        vault,
        Arc::new(MockTransport::new()),
        Arc::new(Ledger::open(dir.path()).unwrap()),
    );

    let summary = engine.run_daily_cycle().await.unwrap();
    assert_eq!(summary.scheduled_campaigns, 1);
    assert_eq!(summary.failed_campaigns, 0);

    let entries = engine.queue().all_entries();
    assert!(!entries.is_empty());
    assert!(entries
        .iter()
        .all(|entry| entry.unit.sender.email == "ok@x.com"));
}

#[tokio::test]
async fn test_full_thread_alternates_roles_and_threads_replies() {
    let vault = vault();
    let dir = tempfile::tempdir().unwrap();
    let ledger = Arc::new(Ledger::open(dir.path()).unwrap());
    let transport = MockTransport::new();
    transport.set_message_id("Quick question", "<parent@mail>");

    let machine = conversation(&transport, Arc::clone(&ledger), Arc::clone(&vault));
    let mut unit = unit(&vault, "warm@x.com", "pool@y.com", 3, 10);

    assert!(matches!(
        machine.advance(&mut unit).await.unwrap(),
        Outcome::Next { .. }
    ));
    assert!(matches!(
        machine.advance(&mut unit).await.unwrap(),
        Outcome::Next { .. }
    ));
    assert_eq!(machine.advance(&mut unit).await.unwrap(), Outcome::Done);

    let sent = transport.sent_messages();
    assert_eq!(sent.len(), 3);
    assert_eq!(sent[0].from, "warm@x.com");
    assert_eq!(sent[1].from, "pool@y.com");
    assert_eq!(sent[2].from, "warm@x.com");

    // The opener starts the thread; later turns reply under the parent.
    assert_eq!(sent[0].subject, "Quick question");
    assert!(sent[0].in_reply_to.is_none());
    for message in &sent[1..] {
        assert_eq!(message.subject, "Re: Quick question");
        assert_eq!(message.in_reply_to.as_deref(), Some("<parent@mail>"));
    }

    let records = ledger.read_day(Ledger::today()).unwrap();
    assert_eq!(records.len(), 3);
    for (index, record) in records.iter().enumerate() {
        assert!(record.mail_sent_status);
        assert_eq!(record.thread_number, u32::try_from(index).unwrap() + 1);
    }
    assert_eq!(records[0].sender.email, "warm@x.com");
    assert_eq!(records[1].sender.email, "pool@y.com");
    assert_eq!(records[2].sender.email, "warm@x.com");
}

#[tokio::test]
async fn test_missing_parent_falls_back_to_fresh_sends() {
    let vault = vault();
    let dir = tempfile::tempdir().unwrap();
    let ledger = Arc::new(Ledger::open(dir.path()).unwrap());
    let transport = MockTransport::new();

    let machine = conversation(&transport, Arc::clone(&ledger), Arc::clone(&vault));
    let mut unit = unit(&vault, "warm@x.com", "pool@y.com", 2, 10);

    assert!(matches!(
        machine.advance(&mut unit).await.unwrap(),
        Outcome::Next { .. }
    ));
    assert_eq!(machine.advance(&mut unit).await.unwrap(), Outcome::Done);

    let sent = transport.sent_messages();
    assert_eq!(sent.len(), 2);
    for message in &sent {
        assert_eq!(message.subject, "Quick question");
        assert!(message.in_reply_to.is_none());
    }

    let records = ledger.read_day(Ledger::today()).unwrap();
    assert!(records.iter().all(|record| record.mail_sent_status));
}

#[tokio::test]
async fn test_same_seed_replays_identical_step_delays() {
    let vault = vault();

    let mut runs = Vec::new();
    for _ in 0..2 {
        let dir = tempfile::tempdir().unwrap();
        let ledger = Arc::new(Ledger::open(dir.path()).unwrap());
        let transport = MockTransport::new();
        let machine = Conversation::new(
            Arc::new(transport.clone()),
            Arc::clone(&ledger),
            Arc::clone(&vault),
            Duration::from_secs(5),
            StdRng::seed_from_u64(42),
        );

        let mut unit = unit(&vault, "warm@x.com", "pool@y.com", 5, 10);
        unit.one_message_delay = 10_000;

        let mut delays = Vec::new();
        while let Outcome::Next { delay_secs } = machine.advance(&mut unit).await.unwrap() {
            delays.push(delay_secs);
        }
        assert_eq!(delays.len(), 4);
        runs.push(delays);
    }

    // Step jitter comes from the seeded source, not ambient entropy.
    assert_eq!(runs[0], runs[1]);
}

#[tokio::test]
async fn test_cap_aborts_sender_turn_without_sending() {
    let vault = vault();
    let dir = tempfile::tempdir().unwrap();
    let ledger = Arc::new(Ledger::open(dir.path()).unwrap());
    let transport = MockTransport::new();

    let machine = conversation(&transport, Arc::clone(&ledger), Arc::clone(&vault));

    // Target of one: the opener lands, the second sender turn must not.
    let mut first = unit(&vault, "warm@x.com", "pool@y.com", 4, 1);
    assert!(matches!(
        machine.advance(&mut first).await.unwrap(),
        Outcome::Next { .. }
    ));
    assert!(matches!(
        machine.advance(&mut first).await.unwrap(),
        Outcome::Next { .. }
    ));
    assert_eq!(
        machine.advance(&mut first).await.unwrap(),
        Outcome::Aborted(AbortReason::CapReached)
    );

    // One sender line, one receiver line, and nothing for the abort.
    assert_eq!(transport.sent_count(), 2);
    assert_eq!(ledger.sent_count(Ledger::today(), "warm@x.com"), 1);

    // A unit whose campaign is already at target aborts immediately.
    let mut second = unit(&vault, "warm@x.com", "other@y.com", 2, 1);
    assert_eq!(
        machine.advance(&mut second).await.unwrap(),
        Outcome::Aborted(AbortReason::CapReached)
    );
    assert_eq!(transport.sent_count(), 2);
}

#[tokio::test]
async fn test_transport_failure_is_recorded_and_conversation_advances() {
    let vault = vault();
    let dir = tempfile::tempdir().unwrap();
    let ledger = Arc::new(Ledger::open(dir.path()).unwrap());
    let transport = MockTransport::new();
    transport.fail_sends_to("pool@y.com");

    let machine = conversation(&transport, Arc::clone(&ledger), Arc::clone(&vault));
    let mut unit = unit(&vault, "warm@x.com", "pool@y.com", 2, 10);

    assert!(matches!(
        machine.advance(&mut unit).await.unwrap(),
        Outcome::Next { .. }
    ));
    assert_eq!(unit.turn, Turn::Receiver);

    let records = ledger.read_day(Ledger::today()).unwrap();
    assert_eq!(records.len(), 1);
    assert!(!records[0].mail_sent_status);
    assert_eq!(transport.sent_count(), 0);
}

#[tokio::test]
async fn test_broken_pool_credential_records_failed_receiver_turn() {
    let vault = vault();
    let dir = tempfile::tempdir().unwrap();
    let ledger = Arc::new(Ledger::open(dir.path()).unwrap());
    let transport = MockTransport::new();

    let machine = conversation(&transport, Arc::clone(&ledger), Arc::clone(&vault));
    let mut unit = unit(&vault, "warm@x.com", "pool@y.com", 2, 10);
    unit.receiver.app_password = "not-a-ciphertext".to_string();

    assert!(matches!(
        machine.advance(&mut unit).await.unwrap(),
        Outcome::Next { .. }
    ));
    assert_eq!(machine.advance(&mut unit).await.unwrap(), Outcome::Done);

    // Only the sender turn reached the provider.
    assert_eq!(transport.sent_count(), 1);

    let records = ledger.read_day(Ledger::today()).unwrap();
    assert_eq!(records.len(), 2);
    assert!(records[0].mail_sent_status);
    assert!(!records[1].mail_sent_status);
    assert_eq!(records[1].sender.email, "pool@y.com");
}

#[tokio::test]
async fn test_general_templates_back_fill_unscoped_campaigns() {
    let vault = vault();
    let store = MemoryStore::new();
    store.insert_campaign(campaign(&vault, "warm@x.com", 2, 50));
    store.insert_pool_mailbox(pool_mailbox(&vault, "pool@y.com"));

    // Scoped to another campaign, so only the general one qualifies.
    let mut scoped = template("scoped", 2);
    scoped.scope = Some("other@x.com".to_string());
    scoped.is_general = false;
    store.insert_template(scoped);
    store.insert_template(template("shared", 2));

    let dir = tempfile::tempdir().unwrap();
    let engine = WarmupEngine::new(
        EngineConfig {
            rng_seed: Some(1),
            ..EngineConfig::default()
        },
        Arc::new(store.clone()),
        Arc::new(store.clone()),
        Arc::new(store.clone()),
        vault,
        Arc::new(MockTransport::new()),
        Arc::new(Ledger::open(dir.path()).unwrap()),
    );

    let summary = engine.run_daily_cycle().await.unwrap();
    assert!(summary.scheduled_units > 0);

    let entries = engine.queue().all_entries();
    assert!(entries
        .iter()
        .all(|entry| entry.unit.template_subject == "shared subject"));
}

#[tokio::test]
async fn test_engine_processes_due_units_end_to_end() {
    let vault = vault();
    let store = MemoryStore::new();
    store.insert_campaign(campaign(&vault, "warm@x.com", 2, 50));
    for index in 0..3 {
        store.insert_pool_mailbox(pool_mailbox(&vault, &format!("pool{index}@y.com")));
    }
    store.insert_template(template("intro", 2));

    let dir = tempfile::tempdir().unwrap();
    let transport = MockTransport::new();
    let engine = WarmupEngine::new(
        EngineConfig {
            rng_seed: Some(7),
            // Tiny budget so every pacing delay collapses to one second.
            max_time_budget_secs: 2,
            ..EngineConfig::default()
        },
        Arc::new(store.clone()),
        Arc::new(store.clone()),
        Arc::new(store.clone()),
        vault,
        Arc::new(transport.clone()),
        Arc::new(Ledger::open(dir.path()).unwrap()),
    );

    let summary = engine.run_daily_cycle().await.unwrap();
    assert_eq!(summary.scheduled_units, 3);

    // Receivers must be distinct pool mailboxes.
    let entries = engine.queue().all_entries();
    let receivers: std::collections::HashSet<String> = entries
        .iter()
        .map(|entry| entry.unit.receiver.email.clone())
        .collect();
    assert_eq!(receivers.len(), 3);

    tokio::time::sleep(Duration::from_millis(1200)).await;
    engine.process_due_units().await;
    transport
        .wait_for_count(3, Duration::from_secs(2))
        .await
        .unwrap();

    // Every unit played its opening sender turn and is pending again.
    assert_eq!(transport.sent_count(), 3);
    assert_eq!(engine.queue().outstanding(), 3);
    assert!(engine
        .queue()
        .all_entries()
        .iter()
        .all(|entry| entry.status == UnitStatus::Pending && entry.unit.step == 1));
}
