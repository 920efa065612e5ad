//! Structured lifecycle events for benchmark runs.
//!
//! - Task-scoped tracing spans via the `TaskSpan` RAII guard
//! - Emission functions for task start/finish, repair iterations, workflow
//!   stages, runtime resolution and batch progress
//!
//! Events are emitted at `info!` level unless noted. Filter with `RUST_LOG`.

use tracing::{info, warn};

use crate::environment::RuntimeSource;

/// RAII guard that enters a task-scoped span for the duration of a task.
///
/// The guard is `!Send`; async code instruments its future with
/// [`TaskSpan::span`] instead.
///
/// ```ignore
/// let _span = TaskSpan::enter("3f2a9c1e", "repair");
/// ```
pub struct TaskSpan {
    _span: tracing::span::EnteredSpan,
}

impl TaskSpan {
    pub fn enter(task_id: &str, controller: &str) -> Self {
        Self {
            _span: Self::span(task_id, controller).entered(),
        }
    }

    /// The span itself, for `tracing::Instrument::instrument`.
    pub fn span(task_id: &str, controller: &str) -> tracing::Span {
        tracing::info_span!("opsbench.task", task_id = %task_id, controller = %controller)
    }
}

/// Emit event: a controller picked up a task.
pub fn emit_task_started(task_id: &str, controller: &str, task_index: usize) {
    info!(
        event = "task.started",
        task_id = %task_id,
        controller = %controller,
        task_index = task_index,
    );
}

/// Emit event: a controller finished a task.
pub fn emit_task_finished(task_id: &str, duration_ms: u64, steps: usize, success: bool) {
    info!(
        event = "task.finished",
        task_id = %task_id,
        duration_ms = duration_ms,
        steps = steps,
        success = success,
    );
}

/// Emit event: one repair iteration ended.
pub fn emit_iteration_finished(task_id: &str, index: u32, success: bool, reason: Option<&str>) {
    info!(
        event = "iteration.finished",
        task_id = %task_id,
        index = index,
        success = success,
        reason = reason.unwrap_or(""),
    );
}

/// Emit event: an iteration was interrupted by a panic or unexpected error.
pub fn emit_iteration_degraded(task_id: &str, index: u32, error: &dyn std::fmt::Display) {
    warn!(event = "iteration.degraded", task_id = %task_id, index = index, error = %error);
}

/// Emit event: one workflow stage ended.
pub fn emit_stage_finished(task_id: &str, stage: &str, status: &str, duration_ms: u64) {
    info!(
        event = "stage.finished",
        task_id = %task_id,
        stage = %stage,
        status = %status,
        duration_ms = duration_ms,
    );
}

/// Emit event: the environment resolver settled on a runtime.
pub fn emit_resolver_resolved(
    identifier: &str,
    source: RuntimeSource,
    degraded: bool,
    probed: usize,
) {
    if degraded {
        warn!(
            event = "resolver.resolved",
            runtime = %identifier,
            source = ?source,
            degraded = degraded,
            probed = probed,
        );
    } else {
        info!(
            event = "resolver.resolved",
            runtime = %identifier,
            source = ?source,
            degraded = degraded,
            probed = probed,
        );
    }
}

/// Emit event: a batch entry failed in isolation (warning level).
pub fn emit_batch_task_failed(label: &str, task_index: usize, error: &dyn std::fmt::Display) {
    warn!(
        event = "batch.task_failed",
        label = %label,
        task_index = task_index,
        error = %error,
    );
}

/// Emit event: a batch finished.
pub fn emit_batch_finished(total: usize, succeeded: usize, duration_ms: u64) {
    info!(
        event = "batch.finished",
        total = total,
        succeeded = succeeded,
        duration_ms = duration_ms,
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_span_create() {
        let _span = TaskSpan::enter("deadbeef", "repair");
        emit_iteration_finished("deadbeef", 1, false, Some("NameError"));
    }
}
