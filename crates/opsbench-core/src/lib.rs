//! OpsBench Core Library
//!
//! Domain model, runtime resolution, artifact execution and the repair loop
//! for benchmarking code-generating assistants on structural-analysis tasks.

pub mod batch;
pub mod domain;
pub mod environment;
pub mod extract;
pub mod obs;
pub mod prompts;
pub mod repair_loop;
pub mod reporting;
pub mod runner;
pub mod telemetry;
pub mod verification;

pub use batch::{
    BatchEntry, BatchItem, BatchManifest, BatchRunner, BatchSummary, LabelStats, ManifestEntry,
    TaskController, TaskOutcome,
};
pub use domain::{
    parse_confirmation, Artifact, BenchError, ClassificationSource, Confirmation,
    ExecutionOutcome, ExitStatus, IterationRecord, LoopState, Result, Task, Verdict,
};
pub use environment::{
    BindingProbe, CompatibilityProbe, EnvironmentCandidate, EnvironmentResolver, ProbeResult,
    ProvisionReport, Provisioner, ResolverConfig, RuntimeHandle, RuntimeSource, VenvProvisioner,
};
pub use extract::{extract_code, strip_code_blocks};
pub use prompts::RepairContext;
pub use repair_loop::{LoopConfig, LoopReport, RepairLoop};
pub use reporting::{read_report, write_report, Report};
pub use runner::{ArtifactExecutor, ProcessRunner};
pub use telemetry::init_tracing;
pub use verification::{ReferenceVerifier, VerificationReport, VerificationStatus};

pub use opsbench_oracle::{GenerationFailure, GenerationParams, Oracle};
