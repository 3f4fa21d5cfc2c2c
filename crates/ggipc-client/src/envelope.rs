use serde::{Deserialize, Serialize};

/// Error code the remote side uses for authorization failures.
pub const UNAUTHORIZED_ERROR: &str = "UnauthorizedError";

/// Body of an outbound request frame.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RequestEnvelope {
    /// Remote operation name, e.g. `aws.greengrass#PublishToTopic`.
    pub operation: String,
    /// Operation arguments.
    pub payload: serde_json::Value,
}

impl RequestEnvelope {
    /// Create a request for `operation`.
    pub fn new(operation: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            operation: operation.into(),
            payload,
        }
    }
}

/// Body of an `ApplicationError` frame.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorBody {
    #[serde(rename = "_errorCode")]
    pub error_code: String,
    #[serde(rename = "_message", default)]
    pub message: String,
}
