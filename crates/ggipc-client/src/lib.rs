//! Client side of a stream-multiplexed local IPC protocol.
//!
//! Many application threads issue requests over a small number of socket
//! connections. Each request runs on its own logical stream, tracked in a
//! bounded [`StreamRegistry`]; a single receive thread ([`Dispatcher`])
//! decodes every inbound frame and routes it to the handler registered for
//! its stream id.

pub mod call;
pub mod config;
pub mod envelope;
pub mod error;
pub mod registry;

#[cfg(target_os = "linux")]
pub mod client;
#[cfg(target_os = "linux")]
pub mod connection;
#[cfg(target_os = "linux")]
pub mod dispatch;

pub use call::SubscriptionCallback;
pub use config::{ClientConfig, DEFAULT_MAX_STREAMS, MIN_STREAMS};
pub use envelope::{ErrorBody, RequestEnvelope, UNAUTHORIZED_ERROR};
pub use error::{ClientError, HandlerError, Result};
pub use registry::{
    ActiveStream, DispatchOutcome, HandlerKind, HandlerRef, StreamHandler, StreamId,
    StreamRegistry,
};

#[cfg(target_os = "linux")]
pub use client::IpcClient;
#[cfg(target_os = "linux")]
pub use connection::{Connection, Subscription};
#[cfg(target_os = "linux")]
pub use dispatch::{forward_incoming_frame, ConnectionId, Dispatcher};
