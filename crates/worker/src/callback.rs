//! Callback delivery for completed jobs
//!
//! [`CallbackClient`] posts the merged answer to the callback address the
//! caller supplied with its question. Delivery is attempted exactly once;
//! failures are logged and counted, never retried.

use crate::job::JobRecord;
use async_trait::async_trait;
use opml_common::METRICS;
use opml_proto::CallbackRequest;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info};

/// Default timeout for a single callback request
pub const CALLBACK_TIMEOUT: Duration = Duration::from_secs(60);

/// Outbound delivery failures for callbacks and heartbeats
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Endpoint returned HTTP {0}")]
    HttpStatus(u16),
}

/// Receives finalized records from the registry
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver one finalized record, called at most once per request id
    async fn notify(&self, record: JobRecord) -> Result<(), DeliveryError>;
}

/// Posts finalized records to their callback address
pub struct CallbackClient {
    client: reqwest::Client,
    node_id: String,
}

impl CallbackClient {
    pub fn new(node_id: impl Into<String>, timeout: Duration) -> Result<Self, DeliveryError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            node_id: node_id.into(),
        })
    }

    /// Callback body for a finalized record
    pub fn payload(&self, record: &JobRecord) -> CallbackRequest {
        CallbackRequest {
            node_id: self.node_id.clone(),
            req_id: record.req_id.clone(),
            model: record.model.clone(),
            prompt: record.prompt.clone(),
            answer: record.answer.clone(),
            state_root: record.state_root.clone(),
        }
    }
}

#[async_trait]
impl Notifier for CallbackClient {
    async fn notify(&self, record: JobRecord) -> Result<(), DeliveryError> {
        let payload = self.payload(&record);
        debug!(req_id = %record.req_id, url = %record.callback, "Posting callback");

        let result = post_json(&self.client, &record.callback, &payload).await;
        match &result {
            Ok(()) => {
                METRICS.delivery.callbacks_delivered.inc();
                info!(
                    req_id = %record.req_id,
                    elapsed_ms = record.age().as_millis() as u64,
                    "Callback delivered",
                );
            }
            Err(e) => {
                METRICS.delivery.callbacks_failed.inc();
                error!(
                    req_id = %record.req_id,
                    url = %record.callback,
                    error = %e,
                    "Callback delivery failed, dropping",
                );
            }
        }
        result
    }
}

/// Single JSON POST; any non-2xx status is an error
pub(crate) async fn post_json<T: serde::Serialize + ?Sized>(
    client: &reqwest::Client,
    url: &str,
    body: &T,
) -> Result<(), DeliveryError> {
    let response = client.post(url).json(body).send().await?;
    if !response.status().is_success() {
        return Err(DeliveryError::HttpStatus(response.status().as_u16()));
    }
    Ok(())
}
