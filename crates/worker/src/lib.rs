//! OPML Worker
//!
//! Verification worker node that answers each question twice: once with a
//! fast LLM runtime and once with a deterministic re-execution VM that
//! commits to a state root. The two results are merged per request id and
//! posted to the caller's callback address exactly once.

pub mod admission;
pub mod callback;
pub mod dispatch;
pub mod engine;
pub mod heartbeat;
pub mod job;
pub mod registry;
pub mod server;
pub mod sweep;

pub use admission::{AdmissionController, AdmissionPermit};
pub use callback::{CallbackClient, DeliveryError, Notifier};
pub use dispatch::{Dispatcher, EngineSlot};
pub use engine::{EngineKind, EngineOutput, InferenceEngine, LlamaEngine, ReplayEngine};
pub use heartbeat::HeartbeatReporter;
pub use job::{JobError, JobFragment, JobRecord, RequestId};
pub use registry::{MergeOutcome, ResultRegistry};
pub use server::{router, AppState};
pub use sweep::OrphanSweeper;
