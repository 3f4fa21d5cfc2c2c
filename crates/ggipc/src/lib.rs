//! Stream-multiplexed local IPC client.
//!
//! Application threads issue requests over a few socket connections; every
//! request gets its own logical stream, and one background thread routes
//! each inbound frame to the handler registered for its stream.
//!
//! # Crate Structure
//!
//! - [`transport`]: connected local sockets and the readiness poller
//! - [`frame`]: stream-tagged message framing
//! - [`client`]: stream registry, receive loop, calls and subscriptions
//!   (behind the default `client` feature)
//! - [`logging`]: `tracing-subscriber` setup (behind the `logging` feature)

/// Re-export transport types.
pub mod transport {
    pub use ggipc_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use ggipc_frame::*;
}

/// Re-export client types (requires `client` feature).
#[cfg(feature = "client")]
pub mod client {
    pub use ggipc_client::*;
}

#[cfg(feature = "logging")]
pub mod logging;
