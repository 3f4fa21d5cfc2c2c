use std::path::Path;
use std::sync::Arc;

use ggipc_frame::FrameWriter;
use ggipc_transport::IpcStream;
use tracing::info;

use crate::config::ClientConfig;
use crate::connection::Connection;
use crate::dispatch::Dispatcher;
use crate::error::Result;
use crate::registry::StreamRegistry;

/// Entry point: one stream registry and one receive thread shared by every
/// attached connection.
#[derive(Debug)]
pub struct IpcClient {
    config: ClientConfig,
    registry: Arc<StreamRegistry>,
    dispatcher: Dispatcher,
}

impl IpcClient {
    /// Build the registry and start the receive thread.
    pub fn new(config: ClientConfig) -> Result<Self> {
        let registry = Arc::new(StreamRegistry::new(config.max_streams)?);
        let dispatcher = Dispatcher::spawn(Arc::clone(&registry), config.frame_config())?;
        info!(
            max_streams = config.max_streams,
            max_payload = config.max_payload_size,
            "IPC client started"
        );
        Ok(Self {
            config,
            registry,
            dispatcher,
        })
    }

    /// Connect to the socket at `path` and attach it.
    pub fn connect(&self, path: impl AsRef<Path>) -> Result<Connection> {
        let stream = ggipc_transport::uds::connect(path)?;
        self.attach(stream)
    }

    /// Attach an already connected stream.
    ///
    /// The receive thread takes a duplicate of the socket for reading; the
    /// returned [`Connection`] keeps `stream` for writing requests.
    pub fn attach(&self, stream: IpcStream) -> Result<Connection> {
        let reader = stream.try_clone()?;
        let writer = FrameWriter::with_config_ipc(stream, self.config.frame_config())?;
        let id = self.dispatcher.register(reader)?;
        Ok(Connection::new(
            id,
            Arc::clone(&self.registry),
            writer,
            self.dispatcher.alive_flag(),
            &self.config,
        ))
    }

    /// The shared stream registry.
    pub fn registry(&self) -> &Arc<StreamRegistry> {
        &self.registry
    }

    /// The receive thread handle.
    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Stop the receive thread. Attached connections are closed and callers
    /// still waiting return [`crate::ClientError::DispatcherStopped`].
    pub fn shutdown(&mut self) {
        self.dispatcher.shutdown();
    }
}
