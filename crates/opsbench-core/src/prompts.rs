//! Prompt construction for analysis, synthesis and classification calls.

use serde::{Deserialize, Serialize};

use crate::domain::outcome::tail_chars;
use crate::domain::{ExecutionOutcome, Task};

/// Maximum stderr characters carried into a prompt.
pub const STDERR_TAIL_CHARS: usize = 4000;

/// Maximum stdout characters shown to the confirmation prompt.
pub const STDOUT_TAIL_CHARS: usize = 6000;

const TRANSLATION_RULES: &str = r#"Strict requirements:
1. Do NOT call ops.source(); it does not exist in openseespy.
2. Do NOT read, open or execute the TCL file. Its content is given above.
3. Translate every TCL command into the matching openseespy call explicitly.
4. Define every variable explicitly at module scope.
5. Print the quantities the instruction asks for so they appear on stdout.

Translation reference (TCL -> openseespy):
wipe -> ops.wipe()
model basic -ndm 2 -ndf 3 -> ops.model('basic', '-ndm', 2, '-ndf', 3)
node 1 0.0 0.0 -> ops.node(1, 0.0, 0.0)
fix 1 1 1 1 -> ops.fix(1, 1, 1, 1)
uniaxialMaterial Elastic 1 200000.0 -> ops.uniaxialMaterial('Elastic', 1, 200000.0)
section Elastic 1 200000.0 2000.0 1000000.0 -> ops.section('Elastic', 1, 200000.0, 2000.0, 1000000.0)
geomTransf Linear 1 -> ops.geomTransf('Linear', 1)
element elasticBeamColumn 1 1 2 2000.0 200000.0 1000000.0 1 -> ops.element('elasticBeamColumn', 1, 1, 2, 2000.0, 200000.0, 1000000.0, 1)
pattern Plain 1 Linear {} -> ops.timeSeries('Linear', 1); ops.pattern('Plain', 1, 1)
load 2 0.0 -50.0 0.0 -> ops.load(2, 0.0, -50.0, 0.0)
constraints Plain -> ops.constraints('Plain')
numberer RCM -> ops.numberer('RCM')
system BandSPD -> ops.system('BandSPD')
test NormDispIncr 1.0e-6 6 -> ops.test('NormDispIncr', 1.0e-6, 6)
algorithm Newton -> ops.algorithm('Newton')
integrator LoadControl 1.0 -> ops.integrator('LoadControl', 1.0)
analysis Static -> ops.analysis('Static')
analyze 1 -> ops.analyze(1)

Start the program with `import openseespy.opensees as ops` and `ops.wipe()`."#;

/// What the previous iteration produced and why it failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepairContext {
    pub previous_artifact: String,
    /// Classification reason (oracle root cause or heuristic fallback).
    pub reason: String,
    /// Raw stderr tail of the failed run, empty when nothing ran.
    pub stderr: String,
}

impl RepairContext {
    pub fn new(
        previous_artifact: impl Into<String>,
        reason: impl Into<String>,
        stderr: &str,
    ) -> Self {
        Self {
            previous_artifact: previous_artifact.into(),
            reason: reason.into(),
            stderr: tail_chars(stderr, STDERR_TAIL_CHARS),
        }
    }
}

/// Plan-only prompt. The answer must not contain code.
pub fn analysis_prompt(task: &Task) -> String {
    format!(
        "Analyze this OpenSees task.\n\n\
         TCL model:\n{model}\n\n\
         User instruction: {instruction}\n\n\
         Briefly describe what the user wants and how the openseespy program should be \
         structured. Do not write any code. Keep it short.",
        model = task.model_description.trim(),
        instruction = task.instruction.trim(),
    )
}

/// Code synthesis prompt, optionally conditioned on a rationale and on the
/// previous failed attempt.
pub fn synthesis_prompt(
    task: &Task,
    rationale: Option<&str>,
    repair: Option<&RepairContext>,
) -> String {
    let mut prompt = String::from(
        "You are an openseespy expert. Write a complete Python program that performs the \
         analysis described by the TCL model and the instruction below.\n\n",
    );

    if let Some(rationale) = rationale.filter(|r| !r.trim().is_empty()) {
        prompt.push_str(&format!("Analysis plan:\n{}\n\n", rationale.trim()));
    }

    prompt.push_str(&format!(
        "Instruction: {}\n\nTCL model:\n{}\n\n",
        task.instruction.trim(),
        task.model_description.trim()
    ));

    if let Some(ctx) = repair {
        prompt.push_str("The previous attempt failed. Fix it and return the whole program.\n\n");
        prompt.push_str(&format!(
            "Previous program:\n```python\n{}\n```\n\n",
            ctx.previous_artifact.trim_end()
        ));
        prompt.push_str(&format!("Failure reason:\n{}\n\n", ctx.reason.trim()));
        if !ctx.stderr.trim().is_empty() {
            prompt.push_str(&format!("Error output:\n{}\n\n", ctx.stderr.trim_end()));
        }
    }

    prompt.push_str(TRANSLATION_RULES);
    prompt.push_str("\n\nReturn the program in a single ```python fenced block.");
    prompt
}

/// Ask for a concise root cause of a failed run.
pub fn root_cause_prompt(artifact: &str, outcome: &ExecutionOutcome) -> String {
    format!(
        "An openseespy program failed ({status}).\n\n\
         Program:\n```python\n{artifact}\n```\n\n\
         Error output:\n{stderr}\n\n\
         State the root cause in one or two sentences and what must change to fix it. \
         Do not write code.",
        status = outcome.describe(),
        artifact = artifact.trim_end(),
        stderr = outcome.stderr_tail(STDERR_TAIL_CHARS).trim_end(),
    )
}

/// Ask whether a clean exit actually performed the requested analysis.
pub fn confirmation_prompt(task: &Task, artifact: &str, outcome: &ExecutionOutcome) -> String {
    format!(
        "A program was written to satisfy this instruction: {instruction}\n\n\
         Program:\n```python\n{artifact}\n```\n\n\
         It exited cleanly. Captured stdout:\n{stdout}\n\n\
         Captured stderr:\n{stderr}\n\n\
         Does the output show that the requested analysis was actually performed and \
         produced the requested results? Answer on the first line with exactly SUCCESS, \
         or FAILURE: <short reason>.",
        instruction = task.instruction.trim(),
        artifact = artifact.trim_end(),
        stdout = tail_chars(&outcome.stdout, STDOUT_TAIL_CHARS).trim_end(),
        stderr = outcome.stderr_tail(STDERR_TAIL_CHARS).trim_end(),
    )
}
