use crate::manager::{AlertManager, AlertOutcome};
use crate::set::ChannelSet;
use crate::Channel;
use anyhow::Result;
use argus_common::types::{Alert, ProbeState, Severity};
use argus_storage::StateStore;
use async_trait::async_trait;
use chrono::{Duration, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

struct RecordingChannel {
    name: String,
    seen: Mutex<Vec<String>>,
}

impl RecordingChannel {
    fn new(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            seen: Mutex::new(Vec::new()),
        })
    }

    fn seen(&self) -> Vec<String> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl Channel for RecordingChannel {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, alert: &Alert) -> Result<()> {
        self.seen.lock().unwrap().push(alert.id.clone());
        Ok(())
    }
}

struct FailingChannel;

#[async_trait]
impl Channel for FailingChannel {
    fn name(&self) -> &str {
        "failing"
    }

    async fn send(&self, _alert: &Alert) -> Result<()> {
        anyhow::bail!("transport down")
    }
}

fn alert(id: &str, probe_id: &str, rule_id: &str) -> Alert {
    Alert {
        id: id.to_string(),
        probe_id: probe_id.to_string(),
        rule_id: rule_id.to_string(),
        severity: Severity::Warning,
        title: "Threshold Breached".into(),
        message: "Value 20 crossed threshold 15".into(),
        timestamp: Utc::now(),
        entities: HashMap::new(),
        links: Vec::new(),
    }
}

fn manager_with(
    channels: &[Arc<dyn Channel>],
    cooldown: Duration,
) -> (Arc<StateStore>, AlertManager) {
    let store = Arc::new(StateStore::open_in_memory().unwrap());
    let mut set = ChannelSet::new();
    for channel in channels {
        set.register(channel.clone());
    }
    let manager = AlertManager::new(store.clone(), set, cooldown, None);
    (store, manager)
}

#[tokio::test]
async fn delivered_alert_is_recorded() {
    let channel = RecordingChannel::new("a");
    let (store, manager) = manager_with(&[channel.clone()], Duration::minutes(15));

    let outcome = manager
        .process(&alert("p1:r1:breach", "p1", "r1"), &ProbeState::default())
        .await
        .unwrap();

    assert_eq!(outcome, AlertOutcome::Delivered);
    assert_eq!(channel.seen(), vec!["p1:r1:breach"]);
    assert!(store.is_alert_sent("p1:r1:breach", None).unwrap());
    assert!(store
        .is_in_cooldown("p1:r1", Duration::minutes(15))
        .unwrap());
}

#[tokio::test]
async fn mute_suppresses_before_any_record() {
    let channel = RecordingChannel::new("a");
    let (store, manager) = manager_with(&[channel.clone()], Duration::minutes(15));

    let mut state = ProbeState::default();
    state.set_muted_until((Utc::now() + Duration::minutes(30)).timestamp_millis());

    // An alert storm while muted leaves no trace at all.
    for i in 0..5 {
        let outcome = manager
            .process(&alert(&format!("p1:r1:{i}"), "p1", "r1"), &state)
            .await
            .unwrap();
        assert_eq!(outcome, AlertOutcome::Muted);
    }

    assert!(channel.seen().is_empty());
    assert!(store.recent_alerts(10).unwrap().is_empty());
    assert!(!store.is_in_cooldown("p1:r1", Duration::minutes(15)).unwrap());

    // After unmute the next event fires normally.
    state.clear_muted();
    let outcome = manager
        .process(&alert("p1:r1:breach", "p1", "r1"), &state)
        .await
        .unwrap();
    assert_eq!(outcome, AlertOutcome::Delivered);
}

#[tokio::test]
async fn expired_mute_no_longer_suppresses() {
    let channel = RecordingChannel::new("a");
    let (_store, manager) = manager_with(&[channel.clone()], Duration::minutes(15));

    let mut state = ProbeState::default();
    state.set_muted_until((Utc::now() - Duration::seconds(1)).timestamp_millis());

    let outcome = manager
        .process(&alert("p1:r1:breach", "p1", "r1"), &state)
        .await
        .unwrap();
    assert_eq!(outcome, AlertOutcome::Delivered);
}

#[tokio::test]
async fn duplicate_id_reaches_no_channel() {
    let channel = RecordingChannel::new("a");
    let (store, manager) = manager_with(&[channel.clone()], Duration::zero());

    let state = ProbeState::default();
    let first = manager
        .process(&alert("p1:r1:breach", "p1", "r1"), &state)
        .await
        .unwrap();
    assert_eq!(first, AlertOutcome::Delivered);

    let sent_at = store.recent_alerts(1).unwrap()[0].sent_at;

    let second = manager
        .process(&alert("p1:r1:breach", "p1", "r1"), &state)
        .await
        .unwrap();
    assert_eq!(second, AlertOutcome::Deduplicated);

    assert_eq!(channel.seen().len(), 1);
    assert_eq!(store.recent_alerts(1).unwrap()[0].sent_at, sent_at);
}

#[tokio::test]
async fn cooldown_gates_distinct_ids_of_same_rule() {
    let channel = RecordingChannel::new("a");
    let (_store, manager) = manager_with(&[channel.clone()], Duration::milliseconds(150));

    let state = ProbeState::default();
    // Two distinct transitions of the same (probe, rule) inside the window.
    assert_eq!(
        manager.process(&alert("p1:r1:aaaa", "p1", "r1"), &state).await.unwrap(),
        AlertOutcome::Delivered
    );
    assert_eq!(
        manager.process(&alert("p1:r1:bbbb", "p1", "r1"), &state).await.unwrap(),
        AlertOutcome::InCooldown
    );
    // A different rule is unaffected.
    assert_eq!(
        manager.process(&alert("p1:r2:cccc", "p1", "r2"), &state).await.unwrap(),
        AlertOutcome::Delivered
    );

    // Once the window passes, the same rule may fire again.
    tokio::time::sleep(std::time::Duration::from_millis(200)).await;
    assert_eq!(
        manager.process(&alert("p1:r1:dddd", "p1", "r1"), &state).await.unwrap(),
        AlertOutcome::Delivered
    );

    assert_eq!(channel.seen(), vec!["p1:r1:aaaa", "p1:r2:cccc", "p1:r1:dddd"]);
}

#[tokio::test]
async fn channel_failure_is_isolated_and_still_records() {
    let good = RecordingChannel::new("good");
    let failing: Arc<dyn Channel> = Arc::new(FailingChannel);
    let (store, manager) =
        manager_with(&[failing, good.clone()], Duration::minutes(15));

    let outcome = manager
        .process(&alert("p1:r1:breach", "p1", "r1"), &ProbeState::default())
        .await
        .unwrap();

    // The healthy channel still delivered, and the alert is marked sent
    // even though one transport failed.
    assert_eq!(outcome, AlertOutcome::Delivered);
    assert_eq!(good.seen(), vec!["p1:r1:breach"]);
    assert!(store.is_alert_sent("p1:r1:breach", None).unwrap());
}

#[tokio::test]
async fn batch_preserves_rule_order() {
    let channel = RecordingChannel::new("a");
    let (_store, manager) = manager_with(&[channel.clone()], Duration::zero());

    let alerts = vec![
        alert("p1:r1:aaaa", "p1", "r1"),
        alert("p1:r2:bbbb", "p1", "r2"),
        alert("p1:r3:cccc", "p1", "r3"),
    ];
    manager.process_all(&alerts, &ProbeState::default()).await;

    assert_eq!(channel.seen(), vec!["p1:r1:aaaa", "p1:r2:bbbb", "p1:r3:cccc"]);
}
