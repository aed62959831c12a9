use anyhow::Result;
use argus_alert::Rule;
use argus_common::types::ProbeDescriptor;
use argus_platform::registry::PlatformRegistry;
use argus_platform::Probe;
use std::sync::Arc;

/// A probe descriptor resolved to runnable pieces: the platform-minted
/// collector plus its ordered rule set.
pub struct BuiltProbe {
    pub descriptor: ProbeDescriptor,
    pub probe: Arc<dyn Probe>,
    pub rules: Arc<Vec<Box<dyn Rule>>>,
}

/// Resolves a descriptor through the registry, rejecting unregistered
/// platforms and unsupported probe types before the platform sees it.
pub fn build_probe(
    registry: &PlatformRegistry,
    descriptor: &ProbeDescriptor,
) -> Result<BuiltProbe> {
    let platform = registry.get(&descriptor.platform).ok_or_else(|| {
        anyhow::anyhow!(
            "probe '{}' references unregistered platform '{}'",
            descriptor.id,
            descriptor.platform
        )
    })?;

    let info = platform.describe();
    if !info
        .supported_probe_types
        .iter()
        .any(|t| t == &descriptor.probe_type)
    {
        anyhow::bail!(
            "platform '{}' does not support probe type '{}' (supported: {})",
            descriptor.platform,
            descriptor.probe_type,
            info.supported_probe_types.join(", ")
        );
    }

    let probe = platform.create_probe(descriptor)?;
    let rules = argus_alert::factory::build_rules(&descriptor.rules)?;

    Ok(BuiltProbe {
        descriptor: descriptor.clone(),
        probe: Arc::from(probe),
        rules: Arc::new(rules),
    })
}
