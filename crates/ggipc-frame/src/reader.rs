use std::io::{ErrorKind, Read};

use bytes::BytesMut;
use ggipc_transport::IpcStream;
use tracing::trace;

use crate::codec::{parse_header, Frame, FrameConfig, HEADER_SIZE};
use crate::error::{FrameError, Result};

/// Reads complete frames from any `Read` stream.
///
/// Each call consumes exactly one frame's bytes from the stream: the header,
/// then the announced body. Nothing past the frame is buffered, so bytes
/// still queued in the socket keep it readable for the poller.
pub struct FrameReader<T> {
    inner: T,
    scratch: BytesMut,
    config: FrameConfig,
}

impl<T: Read> FrameReader<T> {
    /// Create a new frame reader with default configuration.
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, FrameConfig::default())
    }

    /// Create a new frame reader with explicit configuration.
    pub fn with_config(inner: T, config: FrameConfig) -> Self {
        Self {
            inner,
            scratch: BytesMut::new(),
            config,
        }
    }

    /// Read the next complete frame (blocking).
    ///
    /// Returns `Err(FrameError::ConnectionClosed)` when EOF is reached,
    /// including EOF in the middle of a frame.
    pub fn read_frame(&mut self) -> Result<Frame> {
        let mut header = [0u8; HEADER_SIZE];
        fill(&mut self.inner, &mut header)?;
        let (headers, body_len) = parse_header(&header, self.config.max_payload_size)?;

        self.scratch.clear();
        self.scratch.resize(body_len, 0);
        fill(&mut self.inner, &mut self.scratch[..])?;
        let body = self.scratch.split().freeze();

        trace!(
            stream_id = headers.stream_id,
            kind = headers.kind.name(),
            body_len,
            "decoded frame"
        );
        Ok(Frame { headers, body })
    }

    /// Borrow the underlying stream.
    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    /// Mutably borrow the underlying stream.
    pub fn get_mut(&mut self) -> &mut T {
        &mut self.inner
    }

    /// Consume the reader and return the inner stream.
    pub fn into_inner(self) -> T {
        self.inner
    }

    /// Update maximum payload size for subsequent frame decoding.
    pub fn set_max_payload_size(&mut self, max_payload_size: usize) {
        self.config.max_payload_size = max_payload_size;
    }

    /// Current frame reader configuration.
    pub fn config(&self) -> &FrameConfig {
        &self.config
    }
}

impl FrameReader<IpcStream> {
    /// Create a frame reader for `IpcStream` and apply read timeout from config.
    pub fn with_config_ipc(inner: IpcStream, config: FrameConfig) -> Result<Self> {
        inner
            .set_read_timeout(config.read_timeout)
            .map_err(transport_to_frame_error)?;
        Ok(Self::with_config(inner, config))
    }
}

fn fill<T: Read>(inner: &mut T, mut buf: &mut [u8]) -> Result<()> {
    while !buf.is_empty() {
        match inner.read(buf) {
            Ok(0) => return Err(FrameError::ConnectionClosed),
            Ok(n) => {
                let rest = buf;
                buf = &mut rest[n..];
            }
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(FrameError::Io(err)),
        }
    }
    Ok(())
}

pub(crate) fn transport_to_frame_error(err: ggipc_transport::TransportError) -> FrameError {
    match err {
        ggipc_transport::TransportError::Io(io) => FrameError::Io(io),
        ggipc_transport::TransportError::Connect { source, .. } => FrameError::Io(source),
        other => FrameError::Io(std::io::Error::other(other.to_string())),
    }
}
