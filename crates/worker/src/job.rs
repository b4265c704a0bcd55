//! Job records and the fragments engines report into them

use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;

/// Request identifier
pub type RequestId = String;

/// Error kept on a record; the first one reported wins
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum JobError {
    #[error("engine failure: {0}")]
    EngineFailure(String),

    #[error("engine timed out after {0:?}")]
    EngineTimeout(Duration),

    /// Engine finished cleanly but produced nothing
    #[error("job finished without output")]
    NoOutput,
}

/// A question and its evolving merged result
#[derive(Debug, Clone)]
pub struct JobRecord {
    pub req_id: RequestId,
    pub model: String,
    pub prompt: String,
    pub callback: String,

    /// Set by the LLM engine
    pub answer: String,

    /// Hex state commitment set by the re-execution engine
    pub state_root: String,

    pub started_at: Instant,
    pub error: Option<JobError>,
}

impl JobRecord {
    /// Create a skeleton with no engine output
    pub fn new(
        req_id: impl Into<String>,
        model: impl Into<String>,
        prompt: impl Into<String>,
        callback: impl Into<String>,
    ) -> Self {
        Self {
            req_id: req_id.into(),
            model: model.into(),
            prompt: prompt.into(),
            callback: callback.into(),
            answer: String::new(),
            state_root: String::new(),
            started_at: Instant::now(),
            error: None,
        }
    }

    /// All fields required for a callback are present
    pub fn is_done(&self) -> bool {
        !self.req_id.is_empty()
            && !self.model.is_empty()
            && !self.answer.is_empty()
            && !self.state_root.is_empty()
            && !self.callback.is_empty()
    }

    /// Metadata a fragment needs before the registry will track it
    pub fn is_trackable(&self) -> bool {
        !self.req_id.is_empty() && !self.model.is_empty() && !self.callback.is_empty()
    }

    /// Start a fragment carrying this record's metadata and no output
    pub fn fragment(&self) -> JobFragment {
        JobFragment {
            skeleton: JobRecord {
                answer: String::new(),
                state_root: String::new(),
                error: None,
                ..self.clone()
            },
            answer: None,
            state_root: None,
            error: None,
        }
    }

    /// Apply a fragment's non-empty fields
    pub(crate) fn absorb(&mut self, fragment: JobFragment) {
        if let Some(answer) = fragment.answer.filter(|a| !a.is_empty()) {
            self.answer = answer;
        }
        if let Some(state_root) = fragment.state_root.filter(|s| !s.is_empty()) {
            self.state_root = state_root;
        }
        if self.error.is_none() {
            self.error = fragment.error;
        }
    }

    pub fn age(&self) -> Duration {
        self.started_at.elapsed()
    }
}

/// Partial update produced by one engine run
#[derive(Debug, Clone)]
pub struct JobFragment {
    /// Metadata used to seed the record when the fragment arrives first
    pub skeleton: JobRecord,
    pub answer: Option<String>,
    pub state_root: Option<String>,
    pub error: Option<JobError>,
}

impl JobFragment {
    pub fn req_id(&self) -> &str {
        &self.skeleton.req_id
    }

    pub fn with_answer(mut self, answer: impl Into<String>) -> Self {
        self.answer = Some(answer.into());
        self
    }

    pub fn with_state_root(mut self, state_root: impl Into<String>) -> Self {
        self.state_root = Some(state_root.into());
        self
    }

    pub fn with_error(mut self, error: JobError) -> Self {
        self.error = Some(error);
        self
    }

    /// Seed a fresh record from this fragment
    pub(crate) fn into_record(self) -> JobRecord {
        let mut record = self.skeleton.clone();
        record.absorb(self);
        record
    }
}
