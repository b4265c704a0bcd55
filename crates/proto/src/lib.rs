//! OPML wire types
//!
//! JSON bodies exchanged between a worker node, the dispatcher that routes
//! questions to it, and the callback endpoints that receive merged answers.

use serde::{Deserialize, Serialize};

/// Result code for a successful call
pub const CODE_SUCCESS: i32 = 200;

/// Result code when an engine has no free slot
pub const CODE_JOBS_EXCEEDED: i32 = -1;

/// Result code for a request missing required fields
pub const CODE_MALFORMED: i32 = -400;

/// Result code for an unclassified failure
pub const CODE_UNKNOWN: i32 = -500;

/// Result code when the request body is not valid JSON for the route
pub const CODE_UNMARSHAL: i32 = -503;

/// Response envelope shared by every API route
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub code: i32,

    pub msg: String,

    pub data: T,
}

impl<T> ApiResponse<T> {
    /// Wrap a payload with the success code
    pub fn success(data: T) -> Self {
        Self {
            code: CODE_SUCCESS,
            msg: String::new(),
            data,
        }
    }
}

impl ApiResponse<()> {
    /// Build a payload-less failure envelope
    pub fn failure(code: i32, msg: impl Into<String>) -> Self {
        Self {
            code,
            msg: msg.into(),
            data: (),
        }
    }
}

// Inbound question types
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QuestionRequest {
    #[serde(default)]
    pub prompt: String,

    #[serde(default)]
    pub model: String,

    #[serde(default)]
    pub callback: String,

    /// Caller-chosen request id; the node generates one when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub req_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionResponse {
    pub node_id: String,
    pub req_id: String,
}

// Node status
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusResponse {
    /// 0 when every engine has a free slot, otherwise a bitmask of saturated engines
    pub status: u32,
    pub node_id: String,
}

/// Body posted to a question's callback address once both engines reported
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallbackRequest {
    pub node_id: String,
    pub req_id: String,
    pub model: String,
    pub prompt: String,
    pub answer: String,
    pub state_root: String,
}

/// Body posted to the dispatcher's `receive_heart_beat` route
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeartbeatRequest {
    #[serde(rename = "type")]
    pub kind: String,

    #[serde(rename = "default")]
    pub payload: HeartbeatPayload,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeartbeatPayload {
    pub worker_name: String,
    pub queue_length: u32,
}

impl HeartbeatRequest {
    pub fn new(worker_name: impl Into<String>, queue_length: u32) -> Self {
        Self {
            kind: "string".to_string(),
            payload: HeartbeatPayload {
                worker_name: worker_name.into(),
                queue_length,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_heartbeat_shape() {
        let body = serde_json::to_value(HeartbeatRequest::new("127.0.0.1:8080", 1)).unwrap();

        assert_eq!(
            body,
            serde_json::json!({
                "type": "string",
                "default": { "worker_name": "127.0.0.1:8080", "queue_length": 1 }
            })
        );
    }

    #[test]
    fn test_question_request_optional_fields() {
        let req: QuestionRequest =
            serde_json::from_str(r#"{"prompt":"hi","model":"llama-7b"}"#).unwrap();

        assert_eq!(req.prompt, "hi");
        assert!(req.callback.is_empty());
        assert!(req.req_id.is_none());
    }

    #[test]
    fn test_failure_envelope() {
        let body = serde_json::to_value(ApiResponse::failure(CODE_JOBS_EXCEEDED, "jobs exceed")).unwrap();

        assert_eq!(body["code"], -1);
        assert_eq!(body["msg"], "jobs exceed");
        assert!(body["data"].is_null());
    }
}
