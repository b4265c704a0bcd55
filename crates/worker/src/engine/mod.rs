//! Engine boundary
//!
//! Both engines take the same job skeleton and each produces one field of the
//! merged record: the LLM runtime an answer, the re-execution VM a state root.
//! Deadlines are enforced by the caller; dropping an engine future kills any
//! child process it started.

pub mod llama;
pub mod replay;

pub use llama::LlamaEngine;
pub use replay::ReplayEngine;

use crate::job::{JobError, JobFragment, JobRecord};
use async_trait::async_trait;
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;

/// Which record field an engine fills
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EngineKind {
    /// Fast, non-deterministic LLM runtime
    Llm,

    /// Slow, deterministic re-execution producing a state commitment
    Replay,
}

impl EngineKind {
    /// Name used in logs and metric labels
    pub fn name(&self) -> &'static str {
        match self {
            EngineKind::Llm => "llama",
            EngineKind::Replay => "mips",
        }
    }

    /// Bit reported by `/status` when this engine is saturated
    pub fn status_bit(&self) -> u32 {
        match self {
            EngineKind::Llm => 1,
            EngineKind::Replay => 1 << 1,
        }
    }

    /// Put an engine's output into the field it owns
    pub fn fill(&self, fragment: JobFragment, output: String) -> JobFragment {
        match self {
            EngineKind::Llm => fragment.with_answer(output),
            EngineKind::Replay => fragment.with_state_root(output),
        }
    }
}

/// What one engine run produced
///
/// A failed run may still carry a partial value, and both are merged.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EngineOutput {
    pub value: Option<String>,
    pub error: Option<JobError>,
}

impl EngineOutput {
    pub fn success(value: impl Into<String>) -> Self {
        Self {
            value: Some(value.into()),
            error: None,
        }
    }

    pub fn failure(error: JobError) -> Self {
        Self {
            value: None,
            error: Some(error),
        }
    }

    /// Keep `value` alongside `error` when it is non-empty
    pub fn partial(value: impl Into<String>, error: JobError) -> Self {
        let value = value.into();
        Self {
            value: (!value.is_empty()).then_some(value),
            error: Some(error),
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    /// Build the fragment for `kind` carrying both value and error
    pub fn into_fragment(self, kind: EngineKind, fragment: JobFragment) -> JobFragment {
        let fragment = match self.value {
            Some(value) => kind.fill(fragment, value),
            None => fragment,
        };
        match self.error {
            Some(error) => fragment.with_error(error),
            None => fragment,
        }
    }
}

/// A compute engine invoked once per job
#[async_trait]
pub trait InferenceEngine: Send + Sync {
    fn kind(&self) -> EngineKind;

    /// Run the job and report this engine's field, its error, or both
    async fn execute(&self, job: &JobRecord) -> EngineOutput;
}

/// Captured output of a finished child process
#[derive(Debug)]
pub(crate) struct ProcessOutput {
    pub stdout: String,
    pub stderr: String,

    /// Set when the process exited non-zero
    pub exit_error: Option<JobError>,
}

impl ProcessOutput {
    pub fn lines(&self) -> impl Iterator<Item = &str> {
        self.stdout.lines().chain(self.stderr.lines())
    }
}

/// Run a command to completion
///
/// Only a failure to spawn is an `Err`. A non-zero exit keeps whatever the
/// process printed and records the failure in `exit_error`.
pub(crate) async fn run_command(mut cmd: Command) -> Result<ProcessOutput, JobError> {
    let program = cmd.as_std().get_program().to_string_lossy().into_owned();
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let output = cmd
        .output()
        .await
        .map_err(|e| JobError::EngineFailure(format!("failed to run {}: {}", program, e)))?;

    let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
    let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

    let exit_error = (!output.status.success()).then(|| {
        let detail = stderr.lines().last().unwrap_or_default();
        JobError::EngineFailure(format!("{} exited with {}: {}", program, output.status, detail))
    });

    debug!(program = %program, status = %output.status, stderr_bytes = stderr.len(), "Engine process finished");
    Ok(ProcessOutput {
        stdout,
        stderr,
        exit_error,
    })
}
