//! Sequential batch runs with per-task failure isolation.

use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use crate::domain::{panic_message, BenchError, Result, Task};
use crate::obs;
use crate::reporting::Report;

/// What a controller reports back for one task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskOutcome {
    pub success: bool,
    /// Iterations (repair loop) or stages run (workflow).
    pub steps: usize,
    pub error: Option<String>,
    /// Human-readable summary.
    pub summary: String,
    /// Full controller report.
    pub report: serde_json::Value,
}

/// A controller that can drive one task to a verdict.
#[async_trait]
pub trait TaskController: Send + Sync {
    fn name(&self) -> &'static str;

    async fn run_task(&self, task_index: usize, task: &Task) -> Result<TaskOutcome>;
}

/// One labelled task in a batch.
///
/// `task` holds the load error when the entry could not be turned into a
/// task; the runner records such items as failed without running them.
#[derive(Debug, Clone)]
pub struct BatchItem {
    pub label: String,
    pub task: std::result::Result<Task, String>,
}

impl BatchItem {
    pub fn new(label: impl Into<String>, task: Task) -> Self {
        Self {
            label: label.into(),
            task: Ok(task),
        }
    }

    pub fn unloadable(label: impl Into<String>, error: &BenchError) -> Self {
        Self {
            label: label.into(),
            task: Err(error.to_string()),
        }
    }
}

/// On-disk batch description.
///
/// ```json
/// { "tasks": [ { "label": "internal_forces", "model_file": "frame.tcl",
///                "instruction": "compute internal forces" } ] }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchManifest {
    pub tasks: Vec<ManifestEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestEntry {
    #[serde(default)]
    pub label: Option<String>,
    /// Model file, relative to the manifest's directory.
    #[serde(default)]
    pub model_file: Option<PathBuf>,
    /// Inline model text; used when `model_file` is absent.
    #[serde(default)]
    pub model: Option<String>,
    pub instruction: String,
}

impl BatchManifest {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|source| BenchError::ReadFile {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Resolve entries into tasks. Relative model paths are taken from `base`.
    ///
    /// An entry that cannot be loaded becomes an unloadable item, so one bad
    /// entry never discards the rest of the batch.
    pub fn into_items(self, base: &Path) -> Vec<BatchItem> {
        self.tasks
            .into_iter()
            .enumerate()
            .map(|(i, entry)| {
                let label = entry
                    .label
                    .clone()
                    .unwrap_or_else(|| "unlabelled".to_string());
                match entry.load(i + 1, base) {
                    Ok(task) => BatchItem::new(label.clone(), task.with_label(label)),
                    Err(e) => {
                        warn!(
                            entry = i + 1,
                            label = %label,
                            error = %e,
                            "Manifest entry not loadable"
                        );
                        BatchItem::unloadable(label, &e)
                    }
                }
            })
            .collect()
    }
}

impl ManifestEntry {
    fn load(&self, position: usize, base: &Path) -> Result<Task> {
        match (&self.model_file, &self.model) {
            (Some(file), _) => Task::from_file(&base.join(file), &self.instruction),
            (None, Some(model)) => Ok(Task::new(model.clone(), self.instruction.clone())),
            (None, None) => Err(BenchError::InvalidTask(format!(
                "manifest entry {position} has neither model_file nor model"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchEntry {
    pub task_index: usize,
    pub label: String,
    /// `None` when the entry could not be loaded.
    pub task_id: Option<Uuid>,
    pub success: bool,
    pub steps: usize,
    pub error: Option<String>,
    pub report: serde_json::Value,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelStats {
    pub total: usize,
    pub succeeded: usize,
}

impl LabelStats {
    pub fn success_rate(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.succeeded as f64 / self.total as f64
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub batch_id: String,
    pub controller: String,
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub success_rate: f64,
    pub by_label: BTreeMap<String, LabelStats>,
    pub entries: Vec<BatchEntry>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: u64,
}

impl Report for BatchSummary {
    fn report_id(&self) -> String {
        self.batch_id.clone()
    }
}

impl BatchSummary {
    pub fn render_summary(&self) -> String {
        let mut out = vec![
            "=".repeat(60),
            format!("OpsBench batch {} ({})", self.batch_id, self.controller),
            "=".repeat(60),
            format!(
                "Total: {}  Succeeded: {}  Failed: {}  Success rate: {:.1}%",
                self.total,
                self.succeeded,
                self.failed,
                self.success_rate * 100.0
            ),
            String::new(),
            "By label:".to_string(),
        ];
        for (label, stats) in &self.by_label {
            out.push(format!(
                "  {label}: {}/{} ({:.1}%)",
                stats.succeeded,
                stats.total,
                stats.success_rate() * 100.0
            ));
        }
        let failures: Vec<&BatchEntry> = self.entries.iter().filter(|e| !e.success).collect();
        if !failures.is_empty() {
            out.push(String::new());
            out.push("Failures:".to_string());
            for entry in failures {
                out.push(format!(
                    "  #{} [{}] {}",
                    entry.task_index,
                    entry.label,
                    entry.error.as_deref().unwrap_or("failed")
                ));
            }
        }
        out.push("=".repeat(60));
        out.join("\n")
    }
}

/// Runs batch items one after another through a single controller.
pub struct BatchRunner {
    controller: Arc<dyn TaskController>,
    delay: Duration,
}

impl BatchRunner {
    pub fn new(controller: Arc<dyn TaskController>) -> Self {
        Self {
            controller,
            delay: Duration::from_secs(2),
        }
    }

    /// Pause between tasks.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub async fn run(&self, items: Vec<BatchItem>) -> BatchSummary {
        let started_at = Utc::now();
        let total = items.len();
        let mut entries = Vec::with_capacity(total);

        for (i, item) in items.into_iter().enumerate() {
            let task_index = i + 1;
            if i > 0 && !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }

            let BatchItem { label, task } = item;
            let task = match task {
                Ok(task) => task,
                Err(error) => {
                    obs::emit_batch_task_failed(&label, task_index, &error);
                    entries.push(failed_entry(task_index, label, None, error));
                    continue;
                }
            };

            let result = AssertUnwindSafe(self.controller.run_task(task_index, &task))
                .catch_unwind()
                .await;

            let entry = match result {
                Ok(Ok(outcome)) => BatchEntry {
                    task_index,
                    label,
                    task_id: Some(task.id),
                    success: outcome.success,
                    steps: outcome.steps,
                    error: outcome.error,
                    report: outcome.report,
                },
                Ok(Err(e)) => {
                    obs::emit_batch_task_failed(&label, task_index, &e);
                    failed_entry(task_index, label, Some(task.id), e.to_string())
                }
                Err(payload) => {
                    let err = BenchError::Panicked(panic_message(payload.as_ref()));
                    obs::emit_batch_task_failed(&label, task_index, &err);
                    failed_entry(task_index, label, Some(task.id), err.to_string())
                }
            };
            entries.push(entry);
        }

        let mut by_label: BTreeMap<String, LabelStats> = BTreeMap::new();
        for entry in &entries {
            let stats = by_label.entry(entry.label.clone()).or_default();
            stats.total += 1;
            if entry.success {
                stats.succeeded += 1;
            }
        }

        let succeeded = entries.iter().filter(|e| e.success).count();
        let finished_at = Utc::now();
        let duration_ms = (finished_at - started_at).num_milliseconds().max(0) as u64;
        obs::emit_batch_finished(total, succeeded, duration_ms);

        BatchSummary {
            batch_id: format!("batch_{}", started_at.format("%Y%m%d_%H%M%S")),
            controller: self.controller.name().to_string(),
            total,
            succeeded,
            failed: total - succeeded,
            success_rate: if total == 0 {
                0.0
            } else {
                succeeded as f64 / total as f64
            },
            by_label,
            entries,
            started_at,
            finished_at,
            duration_ms,
        }
    }
}

fn failed_entry(
    task_index: usize,
    label: String,
    task_id: Option<Uuid>,
    error: String,
) -> BatchEntry {
    BatchEntry {
        task_index,
        label,
        task_id,
        success: false,
        steps: 0,
        error: Some(error),
        report: serde_json::Value::Null,
    }
}
