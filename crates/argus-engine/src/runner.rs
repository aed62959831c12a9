use crate::error::{EngineError, Result};
use crate::factory::BuiltProbe;
use argus_alert::{Rule, RuleContext};
use argus_common::types::{
    Alert, ProbeDescriptor, ProbeState, RunStatus, Severity,
};
use argus_common::{factkey, ident};
use argus_notify::manager::AlertManager;
use argus_platform::Probe;
use argus_storage::StateStore;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

/// A single-flight lock held longer than `WATCHDOG_FACTOR x timeout` is
/// considered stuck and force-released.
const WATCHDOG_FACTOR: u64 = 2;

struct ProbeEntry {
    descriptor: ProbeDescriptor,
    probe: Arc<dyn Probe>,
    rules: Arc<Vec<Box<dyn Rule>>>,
    /// Present while the periodic timer is armed; dropping it stops the
    /// timer task after any in-flight run completes.
    stop: Option<watch::Sender<()>>,
}

struct RunnerShared {
    store: Arc<StateStore>,
    alerts: Arc<AlertManager>,
    probes: Mutex<HashMap<String, ProbeEntry>>,
    /// probe_id -> lock acquisition stamp (epoch ms). The stamp doubles as
    /// an ownership token: a run whose token no longer matches must not
    /// save state or release the lock.
    active_locks: Mutex<HashMap<String, i64>>,
    stopped: AtomicBool,
}

impl RunnerShared {
    fn lock_probes(&self) -> MutexGuard<'_, HashMap<String, ProbeEntry>> {
        self.probes
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lock_active(&self) -> MutexGuard<'_, HashMap<String, i64>> {
        self.active_locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Timer-driven per-probe execution with a single-flight gate, stuck-run
/// watchdog, per-run deadline, and dynamic enable/disable/mute.
pub struct ProbeRunner {
    shared: Arc<RunnerShared>,
}

impl ProbeRunner {
    pub fn new(store: Arc<StateStore>, alerts: Arc<AlertManager>) -> Self {
        Self {
            shared: Arc::new(RunnerShared {
                store,
                alerts,
                probes: Mutex::new(HashMap::new()),
                active_locks: Mutex::new(HashMap::new()),
                stopped: AtomicBool::new(false),
            }),
        }
    }

    /// Registers a built probe. Enabled probes get their timer armed
    /// immediately; the interval's first tick fires the initial run without
    /// waiting a full period.
    pub fn add_probe(&self, built: BuiltProbe) {
        let probe_id = built.descriptor.id.clone();
        let enabled = built.descriptor.enabled;
        {
            let mut probes = self.shared.lock_probes();
            probes.insert(
                probe_id.clone(),
                ProbeEntry {
                    descriptor: built.descriptor,
                    probe: built.probe,
                    rules: built.rules,
                    stop: None,
                },
            );
        }
        if enabled {
            self.arm(&probe_id);
        }
    }

    /// Arms the periodic timer for a probe. Idempotent: an already-armed
    /// probe keeps its existing timer.
    fn arm(&self, probe_id: &str) {
        if self.shared.stopped.load(Ordering::SeqCst) {
            return;
        }
        let (interval_secs, mut stop_rx) = {
            let mut probes = self.shared.lock_probes();
            let Some(entry) = probes.get_mut(probe_id) else {
                return;
            };
            if entry.stop.is_some() {
                return;
            }
            let (tx, rx) = watch::channel(());
            entry.stop = Some(tx);
            (entry.descriptor.interval.max(1), rx)
        };

        let shared = self.shared.clone();
        let id = probe_id.to_string();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            tracing::info!(probe_id = %id, interval_secs, "Probe timer armed");

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        run_probe(&shared, &id).await;
                    }
                    _ = stop_rx.changed() => break,
                }
            }
            tracing::info!(probe_id = %id, "Probe timer stopped");
        });
    }

    fn descriptor_of(&self, probe_id: &str) -> Result<ProbeDescriptor> {
        let probes = self.shared.lock_probes();
        probes
            .get(probe_id)
            .map(|e| e.descriptor.clone())
            .ok_or_else(|| EngineError::ProbeNotFound(probe_id.to_string()))
    }

    /// Immediately executes one run, honoring the single-flight gate, and
    /// waits for it to finish.
    pub async fn run_once(&self, probe_id: &str) -> Result<()> {
        self.descriptor_of(probe_id)?;
        run_probe(&self.shared, probe_id).await;
        Ok(())
    }

    /// Re-arms the probe's timer from its last known descriptor. Idempotent.
    pub fn enable(&self, probe_id: &str) -> Result<()> {
        self.descriptor_of(probe_id)?;
        self.arm(probe_id);
        Ok(())
    }

    /// Cancels the probe's timer. An in-flight run completes normally.
    /// Idempotent.
    pub fn disable(&self, probe_id: &str) -> Result<()> {
        let mut probes = self.shared.lock_probes();
        let entry = probes
            .get_mut(probe_id)
            .ok_or_else(|| EngineError::ProbeNotFound(probe_id.to_string()))?;
        entry.stop = None;
        Ok(())
    }

    pub fn is_enabled(&self, probe_id: &str) -> bool {
        let probes = self.shared.lock_probes();
        probes
            .get(probe_id)
            .is_some_and(|entry| entry.stop.is_some())
    }

    /// Writes a mute deadline into the probe's persistent state.
    pub fn mute(&self, probe_id: &str, minutes: u64) -> Result<()> {
        if minutes == 0 {
            return Err(EngineError::InvalidArgument(
                "mute duration must be positive".to_string(),
            ));
        }
        self.descriptor_of(probe_id)?;
        let mut state = self
            .shared
            .store
            .load_probe_state(probe_id)
            .map_err(EngineError::Internal)?;
        state.set_muted_until(argus_common::time::now_millis() + (minutes * 60_000) as i64);
        self.shared
            .store
            .save_probe_state(probe_id, &state)
            .map_err(EngineError::Internal)?;
        tracing::info!(probe_id = %probe_id, minutes, "Probe muted");
        Ok(())
    }

    pub fn unmute(&self, probe_id: &str) -> Result<()> {
        self.descriptor_of(probe_id)?;
        let mut state = self
            .shared
            .store
            .load_probe_state(probe_id)
            .map_err(EngineError::Internal)?;
        state.clear_muted();
        self.shared
            .store
            .save_probe_state(probe_id, &state)
            .map_err(EngineError::Internal)?;
        tracing::info!(probe_id = %probe_id, "Probe unmuted");
        Ok(())
    }

    /// Probe ids with a run currently in flight.
    pub fn running_probes(&self) -> Vec<String> {
        self.shared.lock_active().keys().cloned().collect()
    }

    /// Cancels every timer and clears the lock table. In-flight runs finish
    /// on their own; their lock tokens no longer match, so their state saves
    /// are skipped rather than force-killed mid-write.
    pub fn stop(&self) {
        self.shared.stopped.store(true, Ordering::SeqCst);
        {
            let mut probes = self.shared.lock_probes();
            for entry in probes.values_mut() {
                entry.stop = None;
            }
        }
        self.shared.lock_active().clear();
        tracing::info!("Probe runner stopped");
    }
}

/// Top-level run wrapper: failures past what `execute_run` records itself
/// (store I/O, mostly) end up in the log, never in a panic.
async fn run_probe(shared: &Arc<RunnerShared>, probe_id: &str) {
    if let Err(e) = execute_run(shared, probe_id).await {
        tracing::error!(probe_id = %probe_id, error = %e, "Probe run failed outside the probe itself");
    }
}

async fn execute_run(shared: &Arc<RunnerShared>, probe_id: &str) -> anyhow::Result<()> {
    let (probe, rules, timeout_ms) = {
        let probes = shared.lock_probes();
        let Some(entry) = probes.get(probe_id) else {
            return Ok(());
        };
        (
            entry.probe.clone(),
            entry.rules.clone(),
            entry.descriptor.timeout,
        )
    };

    // Single-flight gate with stuck-run watchdog.
    let token = argus_common::time::now_millis();
    let watchdog_fired = {
        let mut locks = shared.lock_active();
        match locks.get(probe_id) {
            Some(&acquired_at) => {
                let age = token - acquired_at;
                if age <= (WATCHDOG_FACTOR * timeout_ms) as i64 {
                    tracing::info!(
                        probe_id = %probe_id,
                        age_ms = age,
                        "Skipping run, previous run still holds the lock"
                    );
                    return Ok(());
                }
                tracing::error!(
                    probe_id = %probe_id,
                    age_ms = age,
                    "Watchdog: force-releasing stuck run lock"
                );
                locks.insert(probe_id.to_string(), token);
                true
            }
            None => {
                locks.insert(probe_id.to_string(), token);
                false
            }
        }
    };

    if watchdog_fired {
        // Routed with an empty state record so a probe-level mute cannot
        // swallow the operator's only signal that runs are wedged.
        let alert = stuck_alert(probe_id);
        shared
            .alerts
            .process_all(&[alert], &ProbeState::default())
            .await;
    }

    let started = Instant::now();
    let mut state = match shared.store.load_probe_state(probe_id) {
        Ok(state) => state,
        Err(e) => {
            release_lock(shared, probe_id, token);
            return Err(e);
        }
    };

    let collected = tokio::time::timeout(
        Duration::from_millis(timeout_ms),
        probe.collect(&mut state),
    )
    .await;

    let facts = match collected {
        // Deadline elapsed. The collect future is gone, but whatever it was
        // stuck on may still be running outside our view (spawned work,
        // blocking pools), so the lock stays held until the watchdog window
        // expires. No state is saved.
        Err(_) => {
            let duration = started.elapsed().as_millis() as i64;
            shared.store.record_run(
                probe_id,
                RunStatus::Error,
                duration,
                Some("Probe timeout"),
            )?;
            tracing::warn!(
                probe_id = %probe_id,
                timeout_ms,
                "Probe run timed out"
            );
            return Ok(());
        }
        // Run-level failure reported by the probe (e.g. circuit open).
        Ok(Err(e)) => {
            let duration = started.elapsed().as_millis() as i64;
            let message = format!("{e:#}");
            tracing::warn!(probe_id = %probe_id, error = %message, "Probe run failed");
            release_lock(shared, probe_id, token);
            shared
                .store
                .record_run(probe_id, RunStatus::Error, duration, Some(&message))?;
            return Ok(());
        }
        Ok(Ok(facts)) => facts,
    };

    factkey::warn_invalid_fact_keys(probe_id, &facts);

    // Rules run in configured order against the same state snapshot; one
    // failing rule is skipped, the rest still execute.
    let now = Utc::now();
    let mut emitted: Vec<Alert> = Vec::new();
    for rule in rules.iter() {
        let mut ctx = RuleContext {
            probe_id,
            state: &mut state,
            now,
        };
        match rule.evaluate(&facts, &mut ctx) {
            Ok(alerts) => emitted.extend(alerts),
            Err(e) => {
                tracing::error!(
                    probe_id = %probe_id,
                    rule_id = rule.id(),
                    error = %e,
                    "Rule evaluation failed, skipping"
                );
            }
        }
    }

    if !emitted.is_empty() {
        shared.alerts.process_all(&emitted, &state).await;
    }

    // A watchdog may have reclaimed the lock while this run dragged on; in
    // that case the save is skipped so the replacement run's state wins.
    let still_owner = shared.lock_active().get(probe_id) == Some(&token);
    if still_owner {
        // Store failures here must not leak the lock; the dedup table being
        // transiently unwritable is recoverable, a wedged probe is not.
        if let Err(e) = shared.store.save_probe_state(probe_id, &state) {
            tracing::error!(probe_id = %probe_id, error = %e, "Failed to persist probe state");
        }
        let duration = started.elapsed().as_millis() as i64;
        match shared
            .store
            .record_run(probe_id, RunStatus::Success, duration, None)
        {
            Ok(()) => {
                tracing::debug!(probe_id = %probe_id, duration_ms = duration, "Probe run complete");
            }
            Err(e) => {
                tracing::error!(probe_id = %probe_id, error = %e, "Failed to record run history");
            }
        }
    } else {
        tracing::warn!(
            probe_id = %probe_id,
            "Run finished after its lock was reclaimed; discarding state changes"
        );
    }
    release_lock(shared, probe_id, token);
    Ok(())
}

/// Releases the single-flight lock iff this run still owns it.
fn release_lock(shared: &RunnerShared, probe_id: &str, token: i64) {
    let mut locks = shared.lock_active();
    if locks.get(probe_id) == Some(&token) {
        locks.remove(probe_id);
    }
}

fn stuck_alert(probe_id: &str) -> Alert {
    Alert {
        id: ident::stuck_id(probe_id),
        probe_id: probe_id.to_string(),
        rule_id: "system".to_string(),
        severity: Severity::Critical,
        title: "Probe Stuck".to_string(),
        message: format!(
            "Probe '{probe_id}' exceeded twice its timeout without completing; its run lock was force-released"
        ),
        timestamp: Utc::now(),
        entities: HashMap::new(),
        links: Vec::new(),
    }
}
