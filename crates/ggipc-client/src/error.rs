use std::time::Duration;

use ggipc_frame::MessageKind;

/// Errors that can occur in client operations.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(#[from] ggipc_transport::TransportError),

    /// Frame-level error.
    #[error("frame error: {0}")]
    Frame(#[from] ggipc_frame::FrameError),

    /// A stream handler rejected a frame.
    #[error("handler error: {0}")]
    Handler(#[from] HandlerError),

    /// JSON serialization/deserialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// The configured stream capacity is below the supported minimum.
    #[error("stream capacity {requested} is below the minimum of {min}")]
    InvalidCapacity { requested: usize, min: usize },

    /// Every stream slot is in use.
    #[error("exceeded maximum concurrent IPC streams ({capacity} slots)")]
    StreamsExhausted { capacity: usize },

    /// Request timed out.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// The remote side answered with an error frame.
    #[error("remote error {code}: {message}")]
    Remote { code: String, message: String },

    /// A response frame arrived but could not be interpreted.
    #[error("malformed response: {0}")]
    MalformedResponse(String),

    /// The subscription stream was terminated before it was acknowledged.
    #[error("subscription closed by remote")]
    SubscriptionClosed,

    /// The receive thread could not be started.
    #[error("failed to spawn receive thread: {0}")]
    Spawn(std::io::Error),

    /// The receive thread is no longer running.
    #[error("receive thread stopped")]
    DispatcherStopped,
}

impl ClientError {
    /// True for a remote `UnauthorizedError` reply.
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, ClientError::Remote { code, .. } if code == crate::envelope::UNAUTHORIZED_ERROR)
    }
}

/// Errors a stream handler reports back to the receive loop.
///
/// Any handler error closes the connection the frame arrived on.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    /// The frame body could not be decoded.
    #[error("malformed frame body: {0}")]
    Malformed(#[from] serde_json::Error),

    /// The frame kind makes no sense for this stream.
    #[error("unexpected {} frame", .0.name())]
    Unexpected(MessageKind),

    /// A subscriber callback failed.
    #[error("callback failed: {0}")]
    Callback(String),
}

pub type Result<T> = std::result::Result<T, ClientError>;
