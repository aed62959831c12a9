use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::factory;
use crate::runner::ProbeRunner;
use argus_common::types::{ProbeDescriptor, ProbeState, RunRecord, SentAlert};
use argus_notify::manager::AlertManager;
use argus_notify::set::ChannelSet;
use argus_platform::registry::PlatformRegistry;
use argus_storage::StateStore;
use std::collections::HashMap;
use std::sync::Arc;

/// Composes the registry, store, pipeline, and scheduler, and exposes the
/// read-only views and control operations the admin surface consumes.
///
/// The engine owns component lifetimes: platforms are initialized during
/// [`Engine::start`] and torn down in [`Engine::stop`].
pub struct Engine {
    config: EngineConfig,
    registry: Arc<PlatformRegistry>,
    store: Arc<StateStore>,
    runner: ProbeRunner,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine").field("config", &self.config).finish_non_exhaustive()
    }
}

impl Engine {
    /// Initializes platforms, builds every configured probe with its rule
    /// set, and arms timers for the enabled ones. Any platform
    /// initialization failure or unresolvable descriptor aborts startup.
    pub async fn start(
        config: EngineConfig,
        registry: PlatformRegistry,
        store: Arc<StateStore>,
        channels: ChannelSet,
    ) -> anyhow::Result<Self> {
        config.validate()?;

        let registry = Arc::new(registry);
        registry.initialize_all(&config.platform_settings()).await?;

        let alerts = Arc::new(AlertManager::new(
            store.clone(),
            channels,
            config.alerting.cooldown(),
            config.alerting.dedup_ttl(),
        ));
        let runner = ProbeRunner::new(store.clone(), alerts);

        // Disabled probes are built too, so `enable` can arm them later
        // from their last known descriptor without a config reload.
        for descriptor in &config.probes {
            let built = factory::build_probe(&registry, descriptor)?;
            runner.add_probe(built);
        }

        tracing::info!(
            probes = config.probes.len(),
            platforms = registry.ids().len(),
            "Engine started"
        );

        Ok(Self {
            config,
            registry,
            store,
            runner,
        })
    }

    // ---- read-only views ----

    /// Probe descriptors from the active configuration.
    pub fn list_probes(&self) -> &[ProbeDescriptor] {
        &self.config.probes
    }

    /// Ids of probes with a run currently in flight.
    pub fn running_probes(&self) -> Vec<String> {
        self.runner.running_probes()
    }

    pub fn is_enabled(&self, probe_id: &str) -> bool {
        self.runner.is_enabled(probe_id)
    }

    pub fn load_probe_state(&self, probe_id: &str) -> Result<ProbeState> {
        self.ensure_known(probe_id)?;
        self.store
            .load_probe_state(probe_id)
            .map_err(EngineError::Internal)
    }

    pub fn recent_alerts(&self, limit: usize) -> Result<Vec<SentAlert>> {
        self.store
            .recent_alerts(limit)
            .map_err(EngineError::Internal)
    }

    pub fn recent_runs(&self, limit: usize) -> Result<Vec<RunRecord>> {
        self.store.recent_runs(limit).map_err(EngineError::Internal)
    }

    pub fn runs_for_probe(&self, probe_id: &str, limit: usize) -> Result<Vec<RunRecord>> {
        self.ensure_known(probe_id)?;
        self.store
            .runs_for_probe(probe_id, limit)
            .map_err(EngineError::Internal)
    }

    /// Concurrent health fan-out over every registered platform.
    pub async fn platform_health(&self) -> HashMap<String, bool> {
        self.registry.health_status().await
    }

    // ---- control operations ----

    pub async fn run_once(&self, probe_id: &str) -> Result<()> {
        self.runner.run_once(probe_id).await
    }

    pub fn enable(&self, probe_id: &str) -> Result<()> {
        self.runner.enable(probe_id)
    }

    pub fn disable(&self, probe_id: &str) -> Result<()> {
        self.runner.disable(probe_id)
    }

    pub fn mute(&self, probe_id: &str, minutes: u64) -> Result<()> {
        self.runner.mute(probe_id, minutes)
    }

    pub fn unmute(&self, probe_id: &str) -> Result<()> {
        self.runner.unmute(probe_id)
    }

    /// Graceful shutdown: cancel timers, let in-flight runs settle, then
    /// tear down platforms.
    pub async fn stop(&self) {
        self.runner.stop();
        self.registry.destroy_all().await;
        tracing::info!("Engine stopped");
    }

    fn ensure_known(&self, probe_id: &str) -> Result<()> {
        if self.config.probes.iter().any(|p| p.id == probe_id) {
            Ok(())
        } else {
            Err(EngineError::ProbeNotFound(probe_id.to_string()))
        }
    }
}
