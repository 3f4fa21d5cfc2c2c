use std::time::Duration;

use ggipc_frame::{FrameConfig, DEFAULT_MAX_PAYLOAD};

/// Default number of stream slots, including the reserved control slot.
pub const DEFAULT_MAX_STREAMS: usize = 16;

/// Smallest usable registry: the control slot plus one call stream.
pub const MIN_STREAMS: usize = 2;

const _: () = assert!(DEFAULT_MAX_STREAMS >= MIN_STREAMS);

/// Client behavior configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Stream slots in the registry. Slot 0 is reserved, so at most
    /// `max_streams - 1` streams are active at once.
    pub max_streams: usize,
    /// Maximum frame body size in either direction.
    pub max_payload_size: usize,
    /// Default timeout for synchronous calls and subscription acknowledgement.
    pub call_timeout: Duration,
    /// Bound on reading the rest of a frame once a connection is readable.
    pub read_timeout: Option<Duration>,
    /// Bound on writing one request frame.
    pub write_timeout: Option<Duration>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            max_streams: DEFAULT_MAX_STREAMS,
            max_payload_size: DEFAULT_MAX_PAYLOAD,
            call_timeout: Duration::from_secs(10),
            read_timeout: Some(Duration::from_secs(5)),
            write_timeout: Some(Duration::from_secs(5)),
        }
    }
}

impl ClientConfig {
    /// Override the number of stream slots.
    pub fn with_max_streams(mut self, max_streams: usize) -> Self {
        self.max_streams = max_streams;
        self
    }

    /// Override the maximum frame body size.
    pub fn with_max_payload_size(mut self, max_payload_size: usize) -> Self {
        self.max_payload_size = max_payload_size;
        self
    }

    /// Override the default call timeout.
    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    /// Frame codec settings derived from this config.
    pub fn frame_config(&self) -> FrameConfig {
        FrameConfig {
            max_payload_size: self.max_payload_size,
            read_timeout: self.read_timeout,
            write_timeout: self.write_timeout,
        }
    }
}
