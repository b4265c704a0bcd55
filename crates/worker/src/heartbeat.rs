//! Periodic liveness reports to the dispatcher
//!
//! Each tick posts the worker name and the highest engine load. A failed
//! post is logged and counted; the loop keeps its cadence regardless.

use crate::admission::AdmissionController;
use crate::callback::{post_json, DeliveryError};
use opml_common::METRICS;
use opml_proto::HeartbeatRequest;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Path appended to the dispatcher base URL
pub const HEARTBEAT_PATH: &str = "receive_heart_beat";

/// Join the dispatcher base URL and the heartbeat path
pub fn build_heartbeat_url(dispatcher_url: &str) -> String {
    if dispatcher_url.ends_with('/') {
        format!("{}{}", dispatcher_url, HEARTBEAT_PATH)
    } else {
        format!("{}/{}", dispatcher_url, HEARTBEAT_PATH)
    }
}

pub struct HeartbeatReporter {
    client: reqwest::Client,
    url: String,
    worker_name: String,
    controllers: Vec<Arc<AdmissionController>>,
    interval: Duration,
}

impl HeartbeatReporter {
    pub fn new(
        dispatcher_url: &str,
        worker_name: impl Into<String>,
        controllers: Vec<Arc<AdmissionController>>,
        interval: Duration,
        timeout: Duration,
    ) -> Result<Self, DeliveryError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: build_heartbeat_url(dispatcher_url),
            worker_name: worker_name.into(),
            controllers,
            interval,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Load of the busiest engine
    pub fn queue_length(&self) -> usize {
        self.controllers.iter().map(|c| c.load()).max().unwrap_or(0)
    }

    /// Post a single heartbeat
    pub async fn send_once(&self) -> Result<(), DeliveryError> {
        let queue_length = self.queue_length();
        let body = HeartbeatRequest::new(self.worker_name.clone(), queue_length as u32);

        match post_json(&self.client, &self.url, &body).await {
            Ok(()) => {
                METRICS.delivery.heartbeats_sent.inc();
                debug!(url = %self.url, queue_length, "Heartbeat sent");
                Ok(())
            }
            Err(e) => {
                METRICS.delivery.heartbeats_failed.inc();
                warn!(url = %self.url, error = %e, "Heartbeat failed");
                Err(e)
            }
        }
    }

    /// Report every interval until `cancel` fires
    ///
    /// The first report goes out one interval after start.
    pub async fn run(self, cancel: CancellationToken) {
        let mut ticker = interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            url = %self.url,
            worker = %self.worker_name,
            interval_secs = self.interval.as_secs(),
            "Heartbeat reporter started",
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let _ = self.send_once().await;
                }
            }
        }

        info!("Heartbeat reporter stopped");
    }
}
