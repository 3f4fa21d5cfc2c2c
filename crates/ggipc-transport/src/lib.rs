//! Connection and readiness primitives for the ggipc receive path.
//!
//! - [`IpcStream`]: a connected local socket (Unix domain socket)
//! - [`Poller`]: readiness notification over many connections (epoll on Linux)
//!
//! This is the lowest layer of ggipc. Framing and stream dispatch build on
//! top of the types provided here.

pub mod error;
pub mod traits;

#[cfg(unix)]
pub mod uds;

#[cfg(target_os = "linux")]
pub mod poll;

pub use error::{Result, TransportError};
pub use traits::IpcStream;

#[cfg(target_os = "linux")]
pub use poll::{Event, Poller, Token};
