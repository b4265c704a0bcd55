//! Deterministic re-execution adapter
//!
//! Runs the verifiable VM program for a prompt and reads the final state
//! root from the `ok: 0x...` line it prints on success.

use super::{run_command, EngineKind, EngineOutput, InferenceEngine};
use crate::job::{JobError, JobRecord};
use async_trait::async_trait;
use opml_common::config::ReplayEngineConfig;
use std::path::PathBuf;
use tokio::process::Command;
use tracing::{debug, info};

/// Marker preceding the state root in the VM's output
const STATE_ROOT_MARKER: &str = "ok:";

/// State roots are 32-byte hashes
const HASH_HEX_LEN: usize = 64;

pub struct ReplayEngine {
    program_path: PathBuf,
    model_path: PathBuf,
    extra_args: Vec<String>,
}

impl ReplayEngine {
    pub fn new(config: &ReplayEngineConfig) -> Self {
        Self {
            program_path: config.program_path.clone(),
            model_path: config.model_path.clone(),
            extra_args: config.extra_args.clone(),
        }
    }

    /// A state root only counts from a clean exit
    async fn state_root(&self, job: &JobRecord) -> Result<String, JobError> {
        let output = run_command(self.command(&job.prompt)).await?;
        if let Some(error) = output.exit_error {
            return Err(error);
        }

        let line = output
            .lines()
            .find(|line| line.contains(STATE_ROOT_MARKER))
            .ok_or_else(|| JobError::EngineFailure("mips run failed: no state root in output".to_string()))?;
        parse_state_root(line)
    }

    fn command(&self, prompt: &str) -> Command {
        let mut cmd = Command::new(&self.program_path);
        cmd.args(&self.extra_args)
            .arg("--model")
            .arg(&self.model_path)
            .arg("--prompt")
            .arg(prompt);
        cmd
    }
}

#[async_trait]
impl InferenceEngine for ReplayEngine {
    fn kind(&self) -> EngineKind {
        EngineKind::Replay
    }

    async fn execute(&self, job: &JobRecord) -> EngineOutput {
        info!(req_id = %job.req_id, "mips worker handling job");

        match self.state_root(job).await {
            Ok(state_root) => {
                debug!(req_id = %job.req_id, %state_root, "mips state root");
                EngineOutput::success(state_root)
            }
            Err(error) => EngineOutput::failure(error),
        }
    }
}

/// Normalize the hex after `ok:` into a `0x`-prefixed 32-byte hash
///
/// Short values are left-padded with zeros and long ones keep their
/// rightmost 32 bytes.
pub fn parse_state_root(line: &str) -> Result<String, JobError> {
    let raw = line
        .split_once(STATE_ROOT_MARKER)
        .map(|(_, rest)| rest)
        .unwrap_or(line)
        .trim();
    let digits = raw
        .strip_prefix("0x")
        .or_else(|| raw.strip_prefix("0X"))
        .unwrap_or(raw);

    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(JobError::EngineFailure(format!("invalid state root: {:?}", raw)));
    }

    let digits = digits.to_ascii_lowercase();
    let tail = &digits[digits.len().saturating_sub(HASH_HEX_LEN)..];
    Ok(format!("0x{:0>width$}", tail, width = HASH_HEX_LEN))
}

#[cfg(test)]
mod tests {
    use super::*;

    const ROOT: &str = "130b06b347409671f3125f3c21b7fbeb720aba7bd2a8bd1b102634750a111686";

    #[test]
    fn test_parse_full_hash() {
        let parsed = parse_state_root(&format!("ok: 0x{}", ROOT)).unwrap();
        assert_eq!(parsed, format!("0x{}", ROOT));
    }

    #[test]
    fn test_parse_pads_short_hash() {
        let parsed = parse_state_root("ok: 0xABC").unwrap();
        assert_eq!(parsed.len(), 66);
        assert!(parsed.ends_with("0abc"));
        assert!(parsed.starts_with("0x000"));
    }

    #[test]
    fn test_parse_keeps_rightmost_bytes() {
        let parsed = parse_state_root(&format!("ok: ff{}", ROOT)).unwrap();
        assert_eq!(parsed, format!("0x{}", ROOT));
    }

    #[test]
    fn test_parse_rejects_non_hex() {
        assert!(matches!(parse_state_root("ok: 0xnothex"), Err(JobError::EngineFailure(_))));
        assert!(matches!(parse_state_root("ok:"), Err(JobError::EngineFailure(_))));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_execute_reads_marker_line() {
        let engine = ReplayEngine::new(&ReplayEngineConfig {
            program_path: PathBuf::from("sh"),
            model_path: PathBuf::from("model.bin"),
            extra_args: vec![
                "-c".to_string(),
                format!("echo step 1; echo 'ok: 0x{}'", ROOT),
                "mlvm".to_string(),
            ],
            timeout_secs: 30,
            max_jobs: 1,
        });

        let output = engine
            .execute(&JobRecord::new("r1", "m", "p", "http://cb"))
            .await;

        assert_eq!(output, EngineOutput::success(format!("0x{}", ROOT)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_execute_without_marker_fails() {
        let engine = ReplayEngine::new(&ReplayEngineConfig {
            program_path: PathBuf::from("sh"),
            model_path: PathBuf::from("model.bin"),
            extra_args: vec!["-c".to_string(), "echo done".to_string(), "mlvm".to_string()],
            timeout_secs: 30,
            max_jobs: 1,
        });

        let output = engine
            .execute(&JobRecord::new("r1", "m", "p", "http://cb"))
            .await;

        assert!(output.value.is_none());
        assert!(matches!(output.error, Some(JobError::EngineFailure(_))));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_marker_after_failed_exit_is_ignored() {
        let engine = ReplayEngine::new(&ReplayEngineConfig {
            program_path: PathBuf::from("sh"),
            model_path: PathBuf::from("model.bin"),
            extra_args: vec![
                "-c".to_string(),
                format!("echo 'ok: 0x{}'; exit 2", ROOT),
                "mlvm".to_string(),
            ],
            timeout_secs: 30,
            max_jobs: 1,
        });

        let output = engine
            .execute(&JobRecord::new("r1", "m", "p", "http://cb"))
            .await;

        assert!(output.value.is_none());
        assert!(matches!(output.error, Some(JobError::EngineFailure(_))));
    }
}
