use std::io::{ErrorKind, Write};

use bytes::BytesMut;
use ggipc_transport::IpcStream;

use crate::codec::{encode_frame, CommonHeaders, FrameConfig, HEADER_SIZE};
use crate::error::{FrameError, Result};
use crate::reader::transport_to_frame_error;

/// Encodes stream-tagged frames onto a `Write` stream.
///
/// Each [`FrameWriter::send`] puts one whole frame on the wire with a single
/// `write_all`. The writer is not synchronized: connections shared between
/// threads keep it behind a mutex so frames from different streams never
/// interleave.
pub struct FrameWriter<T> {
    inner: T,
    encoded: BytesMut,
    max_payload_size: usize,
}

impl<T: Write> FrameWriter<T> {
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, FrameConfig::default())
    }

    /// Writer enforcing `config.max_payload_size` on outbound bodies.
    pub fn with_config(inner: T, config: FrameConfig) -> Self {
        Self {
            inner,
            encoded: BytesMut::with_capacity(HEADER_SIZE),
            max_payload_size: config.max_payload_size,
        }
    }

    /// Send `body` on the stream described by `headers`.
    ///
    /// Oversized bodies are rejected before anything is written. A socket
    /// write timeout expiring mid-frame is reported as `FrameError::Io`; the
    /// connection is then unusable because the frame is truncated.
    pub fn send(&mut self, headers: &CommonHeaders, body: &[u8]) -> Result<()> {
        if body.len() > self.max_payload_size {
            return Err(FrameError::PayloadTooLarge {
                size: body.len(),
                max: self.max_payload_size,
            });
        }

        self.encoded.clear();
        encode_frame(headers, body, &mut self.encoded)?;

        self.inner
            .write_all(&self.encoded)
            .and_then(|()| self.inner.flush())
            .map_err(|err| match err.kind() {
                ErrorKind::WriteZero | ErrorKind::BrokenPipe => FrameError::ConnectionClosed,
                _ => FrameError::Io(err),
            })
    }
}

impl FrameWriter<IpcStream> {
    /// Writer over an `IpcStream`, applying `config.write_timeout` to the socket.
    pub fn with_config_ipc(inner: IpcStream, config: FrameConfig) -> Result<Self> {
        inner
            .set_write_timeout(config.write_timeout)
            .map_err(transport_to_frame_error)?;
        Ok(Self::with_config(inner, config))
    }
}
