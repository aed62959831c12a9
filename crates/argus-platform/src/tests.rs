use crate::registry::{PlatformRegistry, PlatformSettings};
use crate::{Platform, Probe};
use anyhow::Result;
use argus_common::types::{FactValue, Facts, PlatformDescriptor, ProbeDescriptor, ProbeState};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

struct StaticProbe;

#[async_trait]
impl Probe for StaticProbe {
    async fn collect(&self, _state: &mut ProbeState) -> Result<Facts> {
        let mut facts = Facts::new();
        facts.insert("fake.value".to_string(), FactValue::Int(1));
        Ok(facts)
    }
}

struct FakePlatform {
    id: String,
    healthy: bool,
    fail_init: bool,
    initialized: AtomicU32,
    destroyed: AtomicBool,
}

impl FakePlatform {
    fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            healthy: true,
            fail_init: false,
            initialized: AtomicU32::new(0),
            destroyed: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl Platform for FakePlatform {
    fn describe(&self) -> PlatformDescriptor {
        PlatformDescriptor {
            id: self.id.clone(),
            display_name: "Fake".to_string(),
            version: "0.0.0".to_string(),
            supported_probe_types: vec!["static".to_string()],
        }
    }

    async fn initialize(&self, _config: &Value) -> Result<()> {
        if self.fail_init {
            anyhow::bail!("credentials rejected");
        }
        self.initialized.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn create_probe(&self, _descriptor: &ProbeDescriptor) -> Result<Box<dyn Probe>> {
        Ok(Box::new(StaticProbe))
    }

    async fn destroy(&self) -> Result<()> {
        self.destroyed.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn health_check(&self) -> bool {
        self.healthy
    }
}

#[test]
fn duplicate_registration_is_rejected() {
    let mut registry = PlatformRegistry::new();
    registry.register(Arc::new(FakePlatform::new("fake"))).unwrap();

    let err = registry
        .register(Arc::new(FakePlatform::new("fake")))
        .unwrap_err();
    assert!(err.to_string().contains("fake"));

    assert!(registry.has("fake"));
    assert!(!registry.has("other"));
    assert!(registry.get("fake").is_some());
}

#[tokio::test]
async fn initialize_all_honors_enabled_flag() {
    let enabled = Arc::new(FakePlatform::new("enabled"));
    let disabled = Arc::new(FakePlatform::new("disabled"));

    let mut registry = PlatformRegistry::new();
    registry.register(enabled.clone()).unwrap();
    registry.register(disabled.clone()).unwrap();

    let mut settings = HashMap::new();
    settings.insert(
        "disabled".to_string(),
        PlatformSettings {
            enabled: false,
            config: Value::Null,
        },
    );

    registry.initialize_all(&settings).await.unwrap();

    // Platforms absent from the settings map default to enabled.
    assert_eq!(enabled.initialized.load(Ordering::SeqCst), 1);
    assert_eq!(disabled.initialized.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn initialization_failure_names_the_platform() {
    let mut bad = FakePlatform::new("flaky");
    bad.fail_init = true;

    let mut registry = PlatformRegistry::new();
    registry.register(Arc::new(bad)).unwrap();

    let err = registry
        .initialize_all(&HashMap::new())
        .await
        .unwrap_err();
    assert!(format!("{err:#}").contains("flaky"));
}

#[tokio::test]
async fn destroy_all_reaches_every_platform() {
    let a = Arc::new(FakePlatform::new("a"));
    let b = Arc::new(FakePlatform::new("b"));

    let mut registry = PlatformRegistry::new();
    registry.register(a.clone()).unwrap();
    registry.register(b.clone()).unwrap();

    registry.destroy_all().await;
    assert!(a.destroyed.load(Ordering::SeqCst));
    assert!(b.destroyed.load(Ordering::SeqCst));
}

#[tokio::test]
async fn health_status_fans_out() {
    let healthy = Arc::new(FakePlatform::new("up"));
    let mut sick = FakePlatform::new("down");
    sick.healthy = false;

    let mut registry = PlatformRegistry::new();
    registry.register(healthy).unwrap();
    registry.register(Arc::new(sick)).unwrap();

    let status = registry.health_status().await;
    assert_eq!(status["up"], true);
    assert_eq!(status["down"], false);
}
