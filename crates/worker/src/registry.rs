//! Request-keyed result merging
//!
//! The two engines report into the registry independently and in any order.
//! A record is seeded by whichever fragment arrives first and is removed in
//! the same critical section that finds it complete. That removal is what
//! guarantees a single callback per request id.

use crate::callback::Notifier;
use crate::job::{JobFragment, JobRecord, RequestId};
use opml_common::METRICS;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

/// What a merge did with its fragment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    /// Missing request id, model or callback address; nothing tracked
    Dropped,

    /// Record stored, still waiting on the other engine
    Pending,

    /// Record complete, evicted and handed to callback delivery
    Completed,
}

/// In-flight records keyed by request id
pub struct ResultRegistry {
    records: Mutex<HashMap<RequestId, JobRecord>>,
    notifier: Arc<dyn Notifier>,
    tasks: TaskTracker,
}

impl ResultRegistry {
    /// Create a registry that spawns deliveries onto `tasks`
    pub fn new(notifier: Arc<dyn Notifier>, tasks: TaskTracker) -> Self {
        Self {
            records: Mutex::new(HashMap::new()),
            notifier,
            tasks,
        }
    }

    /// Merge one engine's fragment
    ///
    /// Non-empty fields overwrite the stored ones; answer and state root are
    /// independent. Completion is detected and the record evicted under the
    /// same lock, then delivery runs on a tracked task outside it.
    pub fn merge(&self, fragment: JobFragment) -> MergeOutcome {
        if !fragment.skeleton.is_trackable() {
            debug!(req_id = %fragment.req_id(), "Dropping fragment without request id, model or callback");
            return MergeOutcome::Dropped;
        }

        let finished = {
            let mut records = self.records.lock();
            let req_id = fragment.req_id().to_string();

            let done = match records.get_mut(&req_id) {
                Some(record) => {
                    record.absorb(fragment);
                    record.is_done()
                }
                None => {
                    let record = fragment.into_record();
                    let done = record.is_done();
                    records.insert(req_id.clone(), record);
                    done
                }
            };

            let finished = if done { records.remove(&req_id) } else { None };
            METRICS.questions.pending_records.set(records.len() as i64);
            finished
        };

        match finished {
            Some(record) => {
                info!(req_id = %record.req_id, error = ?record.error, "Job complete, delivering callback");
                let notifier = Arc::clone(&self.notifier);
                // Failures are logged by the notifier itself
                self.tasks.spawn(async move {
                    let _ = notifier.notify(record).await;
                });
                MergeOutcome::Completed
            }
            None => MergeOutcome::Pending,
        }
    }

    /// Snapshot of a tracked record
    pub fn get(&self, req_id: &str) -> Option<JobRecord> {
        self.records.lock().get(req_id).cloned()
    }

    pub fn contains(&self, req_id: &str) -> bool {
        self.records.lock().contains_key(req_id)
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }

    /// Remove records older than `ttl` without delivering them
    pub fn evict_older_than(&self, ttl: Duration) -> Vec<JobRecord> {
        let evicted: Vec<JobRecord> = {
            let mut records = self.records.lock();
            let expired: Vec<RequestId> = records
                .iter()
                .filter(|(_, record)| record.age() >= ttl)
                .map(|(req_id, _)| req_id.clone())
                .collect();

            let evicted = expired
                .iter()
                .filter_map(|req_id| records.remove(req_id))
                .collect();
            METRICS.questions.pending_records.set(records.len() as i64);
            evicted
        };

        for record in &evicted {
            METRICS.questions.orphans_evicted.inc();
            warn!(
                req_id = %record.req_id,
                age_secs = record.age().as_secs(),
                has_answer = !record.answer.is_empty(),
                has_state_root = !record.state_root.is_empty(),
                error = ?record.error,
                "Evicting incomplete job, no callback will be sent",
            );
        }
        evicted
    }

    /// Wait for every delivery spawned so far
    #[cfg(test)]
    pub(crate) async fn wait_deliveries(&self) {
        self.tasks.close();
        self.tasks.wait().await;
        self.tasks.reopen();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::callback::DeliveryError;
    use crate::job::JobError;
    use async_trait::async_trait;

    /// Records every delivered callback
    #[derive(Default)]
    struct RecordingNotifier {
        delivered: Mutex<Vec<JobRecord>>,
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn notify(&self, record: JobRecord) -> Result<(), DeliveryError> {
            self.delivered.lock().push(record);
            Ok(())
        }
    }

    fn registry() -> (Arc<ResultRegistry>, Arc<RecordingNotifier>) {
        let notifier = Arc::new(RecordingNotifier::default());
        let registry = Arc::new(ResultRegistry::new(notifier.clone(), TaskTracker::new()));
        (registry, notifier)
    }

    fn skeleton(req_id: &str) -> JobRecord {
        JobRecord::new(req_id, "m", "p", "http://cb")
    }

    #[tokio::test]
    async fn test_answer_then_state_root() {
        let (registry, notifier) = registry();
        let job = skeleton("r1");

        assert_eq!(registry.merge(job.fragment().with_answer("hello")), MergeOutcome::Pending);
        assert!(registry.contains("r1"));

        assert_eq!(registry.merge(job.fragment().with_state_root("0xabc")), MergeOutcome::Completed);
        assert!(!registry.contains("r1"));

        registry.wait_deliveries().await;
        let delivered = notifier.delivered.lock();
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].req_id, "r1");
        assert_eq!(delivered[0].model, "m");
        assert_eq!(delivered[0].prompt, "p");
        assert_eq!(delivered[0].answer, "hello");
        assert_eq!(delivered[0].state_root, "0xabc");
    }

    #[tokio::test]
    async fn test_merge_order_does_not_matter() {
        let (registry, notifier) = registry();
        let job = skeleton("r1");

        registry.merge(job.fragment().with_state_root("0xabc"));
        registry.merge(job.fragment().with_answer("hello"));

        registry.wait_deliveries().await;
        let delivered = notifier.delivered.lock();
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].answer, "hello");
        assert_eq!(delivered[0].state_root, "0xabc");
    }

    #[tokio::test]
    async fn test_missing_metadata_dropped() {
        let (registry, notifier) = registry();

        let no_id = JobRecord::new("", "m", "p", "http://cb");
        let no_model = JobRecord::new("r2", "", "p", "http://cb");
        let no_callback = JobRecord::new("r3", "m", "p", "");

        for job in [no_id, no_model, no_callback] {
            let outcome = registry.merge(job.fragment().with_answer("hello").with_state_root("0xabc"));
            assert_eq!(outcome, MergeOutcome::Dropped);
        }

        registry.wait_deliveries().await;
        assert!(registry.is_empty());
        assert!(notifier.delivered.lock().is_empty());
    }

    #[tokio::test]
    async fn test_late_duplicate_does_not_refire() {
        let (registry, notifier) = registry();
        let job = skeleton("r1");

        registry.merge(job.fragment().with_answer("hello"));
        registry.merge(job.fragment().with_state_root("0xabc"));

        // A late duplicate seeds an independent record that cannot complete alone
        assert_eq!(registry.merge(job.fragment().with_state_root("0xabc")), MergeOutcome::Pending);

        registry.wait_deliveries().await;
        assert_eq!(notifier.delivered.lock().len(), 1);
        assert!(registry.get("r1").unwrap().answer.is_empty());
    }

    #[tokio::test]
    async fn test_error_only_record_is_kept() {
        let (registry, notifier) = registry();
        let job = skeleton("r1");

        registry.merge(
            job.fragment()
                .with_error(JobError::EngineTimeout(Duration::from_secs(300))),
        );
        registry.merge(job.fragment().with_state_root("0xabc"));

        registry.wait_deliveries().await;
        assert!(notifier.delivered.lock().is_empty());

        let record = registry.get("r1").unwrap();
        assert_eq!(record.state_root, "0xabc");
        assert_eq!(record.error, Some(JobError::EngineTimeout(Duration::from_secs(300))));
    }

    #[tokio::test]
    async fn test_error_does_not_block_completion() {
        let (registry, notifier) = registry();
        let job = skeleton("r1");

        registry.merge(
            job.fragment()
                .with_answer("partial")
                .with_error(JobError::EngineFailure("exit status 1".to_string())),
        );
        assert_eq!(registry.merge(job.fragment().with_state_root("0xabc")), MergeOutcome::Completed);

        registry.wait_deliveries().await;
        let delivered = notifier.delivered.lock();
        assert_eq!(delivered.len(), 1);
        assert!(delivered[0].error.is_some());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_merges_fire_once() {
        let (registry, notifier) = registry();

        for round in 0..200 {
            let job = skeleton(&format!("r{}", round));
            let barrier = Arc::new(tokio::sync::Barrier::new(2));

            let answer = {
                let (registry, job, barrier) = (registry.clone(), job.clone(), barrier.clone());
                tokio::spawn(async move {
                    barrier.wait().await;
                    registry.merge(job.fragment().with_answer("hello"))
                })
            };
            let state_root = {
                let (registry, job, barrier) = (registry.clone(), job.clone(), barrier.clone());
                tokio::spawn(async move {
                    barrier.wait().await;
                    registry.merge(job.fragment().with_state_root("0xabc"))
                })
            };

            let outcomes = [answer.await.unwrap(), state_root.await.unwrap()];
            let completed = outcomes.iter().filter(|o| **o == MergeOutcome::Completed).count();
            assert_eq!(completed, 1);
        }

        registry.wait_deliveries().await;
        assert!(registry.is_empty());

        let delivered = notifier.delivered.lock();
        assert_eq!(delivered.len(), 200);
        assert!(delivered.iter().all(|r| r.answer == "hello" && r.state_root == "0xabc"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_evict_older_than() {
        let (registry, notifier) = registry();

        registry.merge(skeleton("old").fragment().with_answer("hello"));
        tokio::time::advance(Duration::from_secs(120)).await;
        registry.merge(skeleton("new").fragment().with_answer("hello"));

        let evicted = registry.evict_older_than(Duration::from_secs(60));

        assert_eq!(evicted.len(), 1);
        assert_eq!(evicted[0].req_id, "old");
        assert!(registry.contains("new"));

        registry.wait_deliveries().await;
        assert!(notifier.delivered.lock().is_empty());
    }

    #[tokio::test]
    async fn test_delivery_keeps_closed_tracker_closed() {
        let notifier = Arc::new(RecordingNotifier::default());
        let tasks = TaskTracker::new();
        let registry = ResultRegistry::new(notifier.clone(), tasks.clone());

        // Shutdown closes the tracker while late fragments can still land
        tasks.close();
        let job = skeleton("r1");
        registry.merge(job.fragment().with_answer("hello"));
        registry.merge(job.fragment().with_state_root("0xabc"));

        tasks.wait().await;
        assert!(tasks.is_closed());
        assert_eq!(notifier.delivered.lock().len(), 1);
    }
}
