//! Dual-engine fan-out
//!
//! Every accepted question runs on both engines at once. The two runs are not
//! coordinated with each other: each reports its own fragment to the registry
//! whenever it finishes, and the registry decides when the job is complete.

use crate::admission::{AdmissionController, AdmissionPermit};
use crate::engine::{EngineKind, EngineOutput, InferenceEngine};
use crate::job::{JobError, JobRecord, RequestId};
use crate::registry::ResultRegistry;
use opml_common::error::{NodeError, Result};
use opml_common::METRICS;
use opml_proto::QuestionRequest;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

/// An engine together with its admission controller and deadline
#[derive(Clone)]
pub struct EngineSlot {
    engine: Arc<dyn InferenceEngine>,
    admission: Arc<AdmissionController>,
    deadline: Duration,
}

impl EngineSlot {
    pub fn new(engine: Arc<dyn InferenceEngine>, capacity: usize, deadline: Duration) -> Self {
        let admission = Arc::new(AdmissionController::new(engine.kind().name(), capacity));
        Self {
            engine,
            admission,
            deadline,
        }
    }

    pub fn kind(&self) -> EngineKind {
        self.engine.kind()
    }

    pub fn admission(&self) -> &Arc<AdmissionController> {
        &self.admission
    }

    pub fn deadline(&self) -> Duration {
        self.deadline
    }
}

/// Accepts questions and fans them out to both engines
pub struct Dispatcher {
    llm: EngineSlot,
    replay: EngineSlot,
    registry: Arc<ResultRegistry>,
    tasks: TaskTracker,
}

impl Dispatcher {
    pub fn new(llm: EngineSlot, replay: EngineSlot, registry: Arc<ResultRegistry>, tasks: TaskTracker) -> Self {
        Self {
            llm,
            replay,
            registry,
            tasks,
        }
    }

    pub fn registry(&self) -> &Arc<ResultRegistry> {
        &self.registry
    }

    /// Admission controllers for both engines, LLM first
    pub fn controllers(&self) -> [Arc<AdmissionController>; 2] {
        [Arc::clone(&self.llm.admission), Arc::clone(&self.replay.admission)]
    }

    /// Bitmask of saturated engines, 0 when both have a free slot
    pub fn status(&self) -> u32 {
        [&self.llm, &self.replay]
            .into_iter()
            .filter(|slot| slot.admission.is_saturated())
            .fold(0, |mask, slot| mask | slot.kind().status_bit())
    }

    /// Validate a question, reserve a slot on each engine and launch both runs
    ///
    /// Returns the request id immediately; the merged answer arrives later
    /// through the callback address. Nothing is spawned or tracked when the
    /// question is rejected.
    pub fn submit(&self, question: QuestionRequest) -> Result<RequestId> {
        let job = match self.skeleton(question) {
            Ok(job) => job,
            Err(e) => {
                METRICS.questions.rejected.with_label_values(&["malformed"]).inc();
                return Err(e);
            }
        };

        // Advisory check before spending anything on the job
        if let Some(slot) = [&self.llm, &self.replay]
            .into_iter()
            .find(|slot| slot.admission.is_saturated())
        {
            info!(engine = slot.kind().name(), req_id = %job.req_id, "jobs exceed");
            METRICS.questions.rejected.with_label_values(&["jobs_exceeded"]).inc();
            return Err(NodeError::admission_exceeded(slot.kind().name()));
        }

        let (llm_permit, replay_permit) = self.reserve(&job)?;

        self.launch(self.llm.clone(), llm_permit, job.clone());
        self.launch(self.replay.clone(), replay_permit, job.clone());

        METRICS.questions.accepted.inc();
        info!(req_id = %job.req_id, model = %job.model, "Question accepted");
        Ok(job.req_id)
    }

    fn skeleton(&self, question: QuestionRequest) -> Result<JobRecord> {
        let QuestionRequest {
            prompt,
            model,
            callback,
            req_id,
        } = question;

        for (field, value) in [("prompt", &prompt), ("model", &model), ("callback", &callback)] {
            if value.trim().is_empty() {
                return Err(NodeError::invalid_input(format!("{} is required", field)));
            }
        }

        let req_id = req_id
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        Ok(JobRecord::new(req_id, model, prompt, callback))
    }

    /// Take one slot per engine, or none at all
    fn reserve(&self, job: &JobRecord) -> Result<(AdmissionPermit, AdmissionPermit)> {
        let rejected = |slot: &EngineSlot| {
            info!(engine = slot.kind().name(), req_id = %job.req_id, "jobs exceed");
            METRICS.questions.rejected.with_label_values(&["jobs_exceeded"]).inc();
            NodeError::admission_exceeded(slot.kind().name())
        };

        let llm = self.llm.admission.try_permit().ok_or_else(|| rejected(&self.llm))?;
        // Dropping `llm` on this early return hands its slot back
        let replay = self.replay.admission.try_permit().ok_or_else(|| rejected(&self.replay))?;
        Ok((llm, replay))
    }

    fn launch(&self, slot: EngineSlot, permit: AdmissionPermit, job: JobRecord) {
        let registry = Arc::clone(&self.registry);
        self.tasks.spawn(run_engine(slot, permit, job, registry));
    }
}

/// Run one engine under its deadline and merge whatever it produced
async fn run_engine(slot: EngineSlot, permit: AdmissionPermit, job: JobRecord, registry: Arc<ResultRegistry>) {
    let kind = slot.kind();
    let started = Instant::now();
    debug!(engine = kind.name(), req_id = %job.req_id, "Engine run started");

    let (output, outcome) = match tokio::time::timeout(slot.deadline, slot.engine.execute(&job)).await {
        Ok(output) if output.is_success() => (output, "success"),
        Ok(output) => {
            warn!(
                engine = kind.name(),
                req_id = %job.req_id,
                error = ?output.error,
                partial = output.value.is_some(),
                "Engine run failed",
            );
            (output, "failure")
        }
        Err(_) => {
            warn!(
                engine = kind.name(),
                req_id = %job.req_id,
                deadline_secs = slot.deadline.as_secs(),
                "Engine run timed out",
            );
            (EngineOutput::failure(JobError::EngineTimeout(slot.deadline)), "timeout")
        }
    };
    let fragment = output.into_fragment(kind, job.fragment());

    METRICS.engines.runs.with_label_values(&[kind.name(), outcome]).inc();
    METRICS
        .engines
        .duration
        .with_label_values(&[kind.name()])
        .observe(started.elapsed().as_secs_f64());

    drop(permit);
    registry.merge(fragment);
}
