//! LLM runtime adapter
//!
//! Runs a llama.cpp style CLI once per job with greedy sampling settings
//! from config. Whatever the process writes to stdout is the answer, even
//! when it exits non-zero.

use super::{run_command, EngineKind, EngineOutput, InferenceEngine};
use crate::job::{JobError, JobRecord};
use async_trait::async_trait;
use opml_common::config::LlmEngineConfig;
use std::path::PathBuf;
use tokio::process::Command;
use tracing::{info, warn};

pub struct LlamaEngine {
    binary_path: PathBuf,
    model_path: PathBuf,
    predict_tokens: u32,
    temperature: f32,
}

impl LlamaEngine {
    pub fn new(config: &LlmEngineConfig) -> Self {
        Self {
            binary_path: config.binary_path.clone(),
            model_path: config.model_path.clone(),
            predict_tokens: config.predict_tokens,
            temperature: config.temperature,
        }
    }

    fn command(&self, prompt: &str) -> Command {
        let mut cmd = Command::new(&self.binary_path);
        cmd.arg("-m")
            .arg(&self.model_path)
            .arg("-p")
            .arg(prompt)
            .arg("--temp")
            .arg(self.temperature.to_string())
            .arg("-n")
            .arg(self.predict_tokens.to_string());
        cmd
    }
}

#[async_trait]
impl InferenceEngine for LlamaEngine {
    fn kind(&self) -> EngineKind {
        EngineKind::Llm
    }

    async fn execute(&self, job: &JobRecord) -> EngineOutput {
        info!(req_id = %job.req_id, model = %job.model, "llama handling job");

        let output = match run_command(self.command(&job.prompt)).await {
            Ok(output) => output,
            Err(error) => return EngineOutput::failure(error),
        };

        let answer = output.stdout.trim();
        match output.exit_error {
            Some(error) => {
                warn!(req_id = %job.req_id, answer_bytes = answer.len(), "llama exited with failure");
                EngineOutput::partial(answer, error)
            }
            None if answer.is_empty() => EngineOutput::failure(JobError::NoOutput),
            None => EngineOutput::success(answer),
        }
    }
}
