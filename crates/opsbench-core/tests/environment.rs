use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use opsbench_core::{
    CompatibilityProbe, EnvironmentResolver, ProbeResult, ProvisionReport, Provisioner,
    ResolverConfig, RuntimeSource,
};
use tempfile::tempdir;

/// Probe whose answer for a runtime flips after the first call.
struct FlippingProbe {
    calls: AtomicUsize,
}

#[async_trait]
impl CompatibilityProbe for FlippingProbe {
    async fn probe(&self, _runtime: &str) -> ProbeResult {
        if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
            ProbeResult::Compatible
        } else {
            ProbeResult::Incompatible {
                reason: "binding uninstalled".to_string(),
            }
        }
    }
}

/// Probe with a fixed set of compatible runtimes; records probe order.
struct ListProbe {
    compatible: Vec<String>,
    seen: Mutex<Vec<String>>,
}

impl ListProbe {
    fn new(compatible: &[&str]) -> Self {
        Self {
            compatible: compatible.iter().map(|s| s.to_string()).collect(),
            seen: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl CompatibilityProbe for ListProbe {
    async fn probe(&self, runtime: &str) -> ProbeResult {
        self.seen.lock().unwrap().push(runtime.to_string());
        if self.compatible.iter().any(|c| c == runtime) {
            ProbeResult::Compatible
        } else {
            ProbeResult::Incompatible {
                reason: "No module named 'openseespy'".to_string(),
            }
        }
    }
}

struct FakeProvisioner {
    result: Option<String>,
    calls: AtomicUsize,
}

#[async_trait]
impl Provisioner for FakeProvisioner {
    async fn provision(&self, probe: &dyn CompatibilityProbe) -> ProvisionReport {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.result {
            Some(python) if probe.probe(python).await.is_compatible() => ProvisionReport {
                python: Some(python.clone()),
                compatible: true,
                steps: Vec::new(),
            },
            _ => ProvisionReport::failed(Vec::new()),
        }
    }
}

fn config(dir: &std::path::Path) -> ResolverConfig {
    ResolverConfig {
        ambient: vec!["python".to_string(), "python3".to_string()],
        well_known: vec!["/usr/local/bin/python3".to_string()],
        ..ResolverConfig::default()
    }
    .with_managed_dir(dir.join("opensees_venv"))
}

fn provisioner(result: Option<&str>) -> Arc<FakeProvisioner> {
    Arc::new(FakeProvisioner {
        result: result.map(str::to_string),
        calls: AtomicUsize::new(0),
    })
}

#[tokio::test]
async fn resolution_is_memoized_even_if_compatibility_changes() {
    let dir = tempdir().unwrap();
    let probe = Arc::new(FlippingProbe {
        calls: AtomicUsize::new(0),
    });
    let resolver =
        EnvironmentResolver::with_components(config(dir.path()), probe.clone(), provisioner(None));

    let first = resolver.resolve().await;
    let second = resolver.resolve().await;

    assert_eq!(first.identifier, "python");
    assert_eq!(first.identifier, second.identifier);
    assert!(!second.degraded);
    assert_eq!(probe.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn first_compatible_candidate_wins_in_order() {
    let dir = tempdir().unwrap();
    let probe = Arc::new(ListProbe::new(&["/usr/local/bin/python3"]));
    let resolver =
        EnvironmentResolver::with_components(config(dir.path()), probe.clone(), provisioner(None));

    let handle = resolver.resolve().await;

    assert_eq!(handle.identifier, "/usr/local/bin/python3");
    assert_eq!(handle.source, RuntimeSource::WellKnown);
    assert_eq!(
        *probe.seen.lock().unwrap(),
        vec!["python", "python3", "/usr/local/bin/python3"]
    );
    assert_eq!(handle.candidates.len(), 3);
    assert!(matches!(
        handle.candidates[0].probe,
        ProbeResult::Incompatible { .. }
    ));
}

#[tokio::test]
async fn provisioning_is_the_fallback_when_nothing_probes_compatible() {
    let dir = tempdir().unwrap();
    let venv_python = "/tmp/opensees_venv/bin/python";
    let probe = Arc::new(ListProbe::new(&[venv_python]));
    let prov = provisioner(Some(venv_python));
    let resolver = EnvironmentResolver::with_components(config(dir.path()), probe, prov.clone());

    let handle = resolver.resolve().await;

    assert_eq!(handle.identifier, venv_python);
    assert_eq!(handle.source, RuntimeSource::Provisioned);
    assert!(!handle.degraded);
    assert_eq!(prov.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn exhausted_resolution_degrades_to_the_fallback_runtime() {
    let dir = tempdir().unwrap();
    let probe = Arc::new(ListProbe::new(&[]));
    let prov = provisioner(None);
    let resolver = EnvironmentResolver::with_components(config(dir.path()), probe, prov.clone());

    let handle = resolver.resolve().await;

    assert!(handle.degraded);
    assert_eq!(handle.source, RuntimeSource::Degraded);
    assert_eq!(handle.identifier, "python3");
    assert!(handle.candidates.iter().all(|c| !c.compatible));
    assert!(handle.provision.is_some());

    // Memoized: provisioning is not retried.
    resolver.resolve().await;
    assert_eq!(prov.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn provisioning_can_be_disabled() {
    let dir = tempdir().unwrap();
    let prov = provisioner(Some("/never/used"));
    let resolver = EnvironmentResolver::with_components(
        config(dir.path()).without_provisioning(),
        Arc::new(ListProbe::new(&[])),
        prov.clone(),
    );

    let handle = resolver.resolve().await;

    assert!(handle.degraded);
    assert!(handle.provision.is_none());
    assert_eq!(prov.calls.load(Ordering::SeqCst), 0);
}
