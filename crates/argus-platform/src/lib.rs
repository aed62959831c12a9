//! Source-family plugins ("platforms") and their upstream resilience layer.
//!
//! A [`Platform`] owns the shared clients for one family of upstreams (EVM
//! JSON-RPC nodes, REST APIs) and mints [`Probe`] instances from configured
//! descriptors. Every outbound call goes through a per-upstream
//! [`resilience::Upstream`] pairing a circuit breaker with a rate limiter,
//! keyed by hostname so the breaker state stays meaningful.

pub mod platforms;
pub mod registry;
pub mod resilience;

#[cfg(test)]
mod tests;

use anyhow::Result;
use argus_common::types::{Facts, PlatformDescriptor, ProbeDescriptor, ProbeState};
use async_trait::async_trait;
use serde_json::Value;

/// A scheduled collector producing one bag of facts per run.
///
/// Probes are stateless between runs except through the `probe` namespace of
/// the supplied [`ProbeState`], which they may read and mutate in place; the
/// scheduler persists it after the run.
///
/// Recoverable upstream trouble should degrade to null-valued facts (plus
/// `<platform>.status = "error"` / `<platform>.error`), not an `Err`. An
/// `Err` is reserved for conditions the scheduler should record as run-level
/// failures, such as a circuit-breaker-open upstream.
#[async_trait]
pub trait Probe: Send + Sync {
    async fn collect(&self, state: &mut ProbeState) -> Result<Facts>;
}

/// A plugin family providing probe implementations and their shared
/// upstream clients.
///
/// Instances are created at configuration load, initialized once through
/// [`registry::PlatformRegistry::initialize_all`], and must not leak tasks
/// or sockets past `destroy` returning.
#[async_trait]
pub trait Platform: Send + Sync {
    /// Static self-description, including the supported probe types the
    /// factory validates descriptors against.
    fn describe(&self) -> PlatformDescriptor;

    async fn initialize(&self, config: &Value) -> Result<()>;

    /// Mints a probe for a descriptor whose `type` has already been checked
    /// against [`PlatformDescriptor::supported_probe_types`].
    fn create_probe(&self, descriptor: &ProbeDescriptor) -> Result<Box<dyn Probe>>;

    async fn destroy(&self) -> Result<()>;

    /// True while the platform considers its upstreams usable.
    async fn health_check(&self) -> bool;
}
