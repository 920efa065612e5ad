//! Environment resolution: which local runtime executes generated artifacts.
//!
//! Candidates are probed in a fixed order (ambient, managed, well-known
//! install paths). The first compatible one wins. If none is compatible a
//! managed runtime is provisioned; if that fails too, a degraded handle to
//! the fallback runtime is returned. The result is memoized for the life of
//! the resolver and never re-probed.

pub mod probe;
pub mod provision;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;
use tracing::{debug, warn};

use crate::obs;
pub use probe::{BindingProbe, CompatibilityProbe, ProbeResult};
pub use provision::{
    venv_python, InstallStrategy, ProvisionReport, ProvisionStep, Provisioner, VenvProvisioner,
};

/// Where a candidate came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeSource {
    /// Command on `PATH`.
    Ambient,
    /// Previously provisioned isolated runtime.
    Managed,
    /// Well-known install path.
    WellKnown,
    /// Provisioned during this resolution.
    Provisioned,
    /// Nothing was compatible; best-effort fallback.
    Degraded,
}

/// One probed runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentCandidate {
    pub identifier: String,
    pub source: RuntimeSource,
    pub compatible: bool,
    pub probe: ProbeResult,
    pub probed_at: DateTime<Utc>,
}

/// The resolved runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeHandle {
    pub identifier: String,
    pub source: RuntimeSource,
    /// True when no candidate probed compatible. Execution failures on a
    /// degraded runtime may be environmental.
    pub degraded: bool,
    /// Every probe made during resolution, in order.
    pub candidates: Vec<EnvironmentCandidate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provision: Option<ProvisionReport>,
    pub resolved_at: DateTime<Utc>,
}

impl RuntimeHandle {
    /// Handle for a runtime chosen without probing.
    pub fn unprobed(identifier: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            source: RuntimeSource::Ambient,
            degraded: false,
            candidates: Vec::new(),
            provision: None,
            resolved_at: Utc::now(),
        }
    }

    /// Executable to launch.
    pub fn program(&self) -> &str {
        &self.identifier
    }
}

/// Resolver settings.
#[derive(Debug, Clone)]
pub struct ResolverConfig {
    /// Commands resolved through `PATH`.
    pub ambient: Vec<String>,
    /// Directory of the managed (provisioned) runtime.
    pub managed_dir: PathBuf,
    /// Absolute install paths tried after the managed runtime.
    pub well_known: Vec<String>,
    pub probe_timeout: Duration,
    /// Installed best-effort into a provisioned runtime.
    pub baseline_packages: Vec<String>,
    /// Package providing the native binding.
    pub binding_package: String,
    pub alternate_index: String,
    /// Per-command timeout while provisioning.
    pub install_timeout: Duration,
    /// Runtime used for the degraded handle.
    pub fallback: String,
    /// When false, an incompatible set of candidates degrades immediately.
    pub provision: bool,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            ambient: vec!["python".to_string(), "python3".to_string()],
            managed_dir: PathBuf::from("./opensees_venv"),
            well_known: vec![
                "/usr/bin/python3".to_string(),
                "/opt/homebrew/bin/python3".to_string(),
                "/usr/local/bin/python3".to_string(),
            ],
            probe_timeout: Duration::from_secs(10),
            baseline_packages: vec![
                "numpy".to_string(),
                "matplotlib".to_string(),
                "scipy".to_string(),
            ],
            binding_package: "openseespy".to_string(),
            alternate_index: "https://pypi.org/simple/".to_string(),
            install_timeout: Duration::from_secs(600),
            fallback: "python3".to_string(),
            provision: true,
        }
    }
}

impl ResolverConfig {
    pub fn with_managed_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.managed_dir = dir.into();
        self
    }

    pub fn without_provisioning(mut self) -> Self {
        self.provision = false;
        self
    }

    /// Ordered candidate list. The managed runtime is included only if it
    /// exists on disk. Duplicates keep their first position.
    pub fn candidates(&self) -> Vec<(String, RuntimeSource)> {
        let mut out: Vec<(String, RuntimeSource)> = Vec::new();
        let mut push = |id: String, source: RuntimeSource| {
            if !out.iter().any(|(existing, _)| *existing == id) {
                out.push((id, source));
            }
        };

        for id in &self.ambient {
            push(id.clone(), RuntimeSource::Ambient);
        }
        let managed = venv_python(&self.managed_dir);
        if managed.exists() {
            push(managed.to_string_lossy().to_string(), RuntimeSource::Managed);
        }
        for id in &self.well_known {
            push(id.clone(), RuntimeSource::WellKnown);
        }
        out
    }
}

/// Discovers and memoizes a compatible runtime.
///
/// Safe to share behind an `Arc`: concurrent callers of [`resolve`] wait on
/// the same initialization.
///
/// [`resolve`]: EnvironmentResolver::resolve
pub struct EnvironmentResolver {
    config: ResolverConfig,
    probe: Arc<dyn CompatibilityProbe>,
    provisioner: Arc<dyn Provisioner>,
    memo: OnceCell<RuntimeHandle>,
}

impl EnvironmentResolver {
    pub fn new(config: ResolverConfig) -> Self {
        let probe = Arc::new(BindingProbe::new(config.probe_timeout));
        let provisioner = Arc::new(VenvProvisioner::from_config(&config));
        Self::with_components(config, probe, provisioner)
    }

    pub fn with_components(
        config: ResolverConfig,
        probe: Arc<dyn CompatibilityProbe>,
        provisioner: Arc<dyn Provisioner>,
    ) -> Self {
        Self {
            config,
            probe,
            provisioner,
            memo: OnceCell::new(),
        }
    }

    /// Resolver that always returns `handle` without probing.
    pub fn fixed(handle: RuntimeHandle) -> Self {
        let config = ResolverConfig {
            fallback: handle.identifier.clone(),
            provision: false,
            ..ResolverConfig::default()
        };
        Self {
            config,
            probe: Arc::new(BindingProbe::default()),
            provisioner: Arc::new(NoProvisioner),
            memo: OnceCell::new_with(Some(handle)),
        }
    }

    /// Resolve once; later calls return the memoized handle.
    ///
    /// Never fails: exhaustion yields a degraded handle.
    pub async fn resolve(&self) -> RuntimeHandle {
        self.memo.get_or_init(|| self.discover()).await.clone()
    }

    /// Memoized handle, if resolution already happened.
    pub fn resolved(&self) -> Option<&RuntimeHandle> {
        self.memo.get()
    }

    async fn discover(&self) -> RuntimeHandle {
        let mut probed = Vec::new();

        for (identifier, source) in self.config.candidates() {
            let result = self.probe.probe(&identifier).await;
            let compatible = result.is_compatible();
            debug!(runtime = %identifier, compatible, reason = ?result.reason(), "Probed runtime");
            probed.push(EnvironmentCandidate {
                identifier: identifier.clone(),
                source,
                compatible,
                probe: result,
                probed_at: Utc::now(),
            });
            if compatible {
                return self.finish(identifier, source, false, probed, None);
            }
        }

        let report = if self.config.provision {
            let report = self.provisioner.provision(self.probe.as_ref()).await;
            if let (true, Some(python)) = (report.compatible, report.python.clone()) {
                probed.push(EnvironmentCandidate {
                    identifier: python.clone(),
                    source: RuntimeSource::Provisioned,
                    compatible: true,
                    probe: ProbeResult::Compatible,
                    probed_at: Utc::now(),
                });
                return self.finish(python, RuntimeSource::Provisioned, false, probed, Some(report));
            }
            Some(report)
        } else {
            None
        };

        warn!(
            fallback = %self.config.fallback,
            probed = probed.len(),
            "No compatible runtime found; using degraded fallback"
        );
        let fallback = self.config.fallback.clone();
        self.finish(fallback, RuntimeSource::Degraded, true, probed, report)
    }

    fn finish(
        &self,
        identifier: String,
        source: RuntimeSource,
        degraded: bool,
        candidates: Vec<EnvironmentCandidate>,
        provision: Option<ProvisionReport>,
    ) -> RuntimeHandle {
        obs::emit_resolver_resolved(&identifier, source, degraded, candidates.len());
        RuntimeHandle {
            identifier,
            source,
            degraded,
            candidates,
            provision,
            resolved_at: Utc::now(),
        }
    }
}

struct NoProvisioner;

#[async_trait::async_trait]
impl Provisioner for NoProvisioner {
    async fn provision(&self, _probe: &dyn CompatibilityProbe) -> ProvisionReport {
        ProvisionReport::failed(Vec::new())
    }
}
