//! The receive thread: waits for readable connections, decodes one frame
//! per readiness event and hands it to the stream's handler.

use std::collections::HashMap;
use std::io::{Read, Write};
use std::os::fd::AsRawFd;
use std::os::unix::net::UnixStream;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::JoinHandle;

use ggipc_frame::{FrameConfig, FrameReader};
use ggipc_transport::{Event, IpcStream, Poller, Token};
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::error::{ClientError, Result};
use crate::registry::{DispatchOutcome, StreamRegistry};

const THREAD_NAME: &str = "ggipc-recv";
const WAKER_TOKEN: Token = Token(0);

/// Identifies a connection registered with the [`Dispatcher`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(pub u64);

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Decode one frame from `reader` and route it through `registry`.
///
/// Frames with a negative stream id and frames for streams nobody holds are
/// logged and dropped. An `Err` means the connection can no longer be
/// trusted and must be closed: the frame failed to decode or its handler
/// failed.
pub fn forward_incoming_frame<R: Read>(
    registry: &StreamRegistry,
    reader: &mut FrameReader<R>,
) -> Result<()> {
    let frame = reader.read_frame()?;
    let headers = frame.headers;

    if headers.stream_id < 0 {
        warn!(
            stream_id = headers.stream_id,
            "frame has negative stream id; dropped"
        );
        return Ok(());
    }

    match registry.dispatch(&headers, &frame.body) {
        DispatchOutcome::Handled(result) => result.map_err(ClientError::from),
        DispatchOutcome::Unmatched => {
            warn!(
                stream_id = headers.stream_id,
                kind = headers.kind.name(),
                "frame for unknown stream dropped"
            );
            Ok(())
        }
    }
}

/// Requests from the handle to the receive thread.
enum Incoming {
    Adopt {
        token: Token,
        reader: FrameReader<IpcStream>,
    },
    /// Registration failed after the reader was queued.
    Forget(Token),
}

/// State shared between the handle and the receive thread.
struct Shared {
    poller: Poller,
    stop: AtomicBool,
    waker: Mutex<UnixStream>,
    #[cfg(test)]
    fail_next_wait: AtomicBool,
}

impl Shared {
    fn wake(&self) {
        if let Err(err) = self.waker.lock().write_all(&[1]) {
            warn!(%err, "failed to wake IPC receive thread");
        }
    }
}

/// Handle to the receive thread.
///
/// Created once per client. Dropping the handle stops the thread and closes
/// every connection it still owns.
pub struct Dispatcher {
    shared: Arc<Shared>,
    alive: Arc<AtomicBool>,
    incoming: mpsc::Sender<Incoming>,
    fatal: Mutex<mpsc::Receiver<ClientError>>,
    next_token: AtomicU64,
    frame_config: FrameConfig,
    thread: Option<JoinHandle<()>>,
}

impl Dispatcher {
    /// Create the poller and start the receive thread.
    pub fn spawn(registry: Arc<StreamRegistry>, frame_config: FrameConfig) -> Result<Self> {
        let poller = Poller::new().inspect_err(|err| {
            error!(%err, "failed to create poller for IPC sockets");
        })?;

        let (waker_rx, waker_tx) = UnixStream::pair().map_err(ClientError::Spawn)?;
        waker_rx.set_nonblocking(true).map_err(ClientError::Spawn)?;
        poller.add(waker_rx.as_raw_fd(), WAKER_TOKEN)?;

        let shared = Arc::new(Shared {
            poller,
            stop: AtomicBool::new(false),
            waker: Mutex::new(waker_tx),
            #[cfg(test)]
            fail_next_wait: AtomicBool::new(false),
        });
        let alive = Arc::new(AtomicBool::new(true));
        let (incoming_tx, incoming_rx) = mpsc::channel();
        let (fatal_tx, fatal_rx) = mpsc::channel();

        let receive_loop = ReceiveLoop {
            shared: Arc::clone(&shared),
            alive: Arc::clone(&alive),
            registry,
            incoming: incoming_rx,
            readers: HashMap::new(),
            waker: waker_rx,
        };

        let thread = std::thread::Builder::new()
            .name(THREAD_NAME.to_string())
            .spawn(move || {
                if let Err(err) = receive_loop.run() {
                    error!(%err, "IPC receive thread failed; no further frames can be delivered");
                    let _ = fatal_tx.send(err);
                }
            })
            .map_err(|err| {
                error!(%err, "failed to create IPC receive thread");
                ClientError::Spawn(err)
            })?;

        Ok(Self {
            shared,
            alive,
            incoming: incoming_tx,
            fatal: Mutex::new(fatal_rx),
            next_token: AtomicU64::new(WAKER_TOKEN.0 + 1),
            frame_config,
            thread: Some(thread),
        })
    }

    /// Hand the read side of a connection to the receive thread.
    ///
    /// The dispatcher owns `stream` from now on and closes it when a frame
    /// fails to decode, a handler fails, or the thread stops.
    pub fn register(&self, stream: IpcStream) -> Result<ConnectionId> {
        if !self.is_running() {
            return Err(ClientError::DispatcherStopped);
        }

        let token = Token(self.next_token.fetch_add(1, Ordering::Relaxed));
        let fd = stream.as_raw_fd();
        let reader = FrameReader::with_config_ipc(stream, self.frame_config.clone())?;

        // The reader must be queued before the fd can report readiness.
        self.incoming
            .send(Incoming::Adopt { token, reader })
            .map_err(|_| ClientError::DispatcherStopped)?;
        if let Err(err) = self.shared.poller.add(fd, token) {
            error!(fd, %err, "failed to watch IPC connection");
            if self.incoming.send(Incoming::Forget(token)).is_ok() {
                self.shared.wake();
            }
            return Err(err.into());
        }

        let id = ConnectionId(token.0);
        debug!(conn = %id, fd, "registered IPC connection");
        Ok(id)
    }

    /// True while the receive thread is delivering frames.
    pub fn is_running(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
            && self
                .thread
                .as_ref()
                .is_some_and(|thread| !thread.is_finished())
    }

    /// Flag cleared by the receive thread as it stops.
    pub(crate) fn alive_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.alive)
    }

    /// The error that stopped the receive thread, if it has failed.
    pub fn try_fatal(&self) -> Option<ClientError> {
        self.fatal.lock().try_recv().ok()
    }

    /// Block until the receive thread fails, returning its error.
    ///
    /// Returns `None` if the thread stopped through [`Dispatcher::shutdown`].
    pub fn wait_fatal(&self) -> Option<ClientError> {
        self.fatal.lock().recv().ok()
    }

    /// Stop the receive thread and wait for it to exit.
    ///
    /// Every owned connection is shut down and every active stream is
    /// abandoned, so blocked callers return `DispatcherStopped`.
    pub fn shutdown(&mut self) {
        let Some(thread) = self.thread.take() else {
            return;
        };

        self.shared.stop.store(true, Ordering::SeqCst);
        self.shared.wake();
        if thread.join().is_err() {
            error!("IPC receive thread panicked");
        }
    }

    /// Make the receive thread's next poller wait fail.
    #[cfg(test)]
    fn fail_next_wait(&self) {
        self.shared.fail_next_wait.store(true, Ordering::SeqCst);
        self.shared.wake();
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("running", &self.is_running())
            .finish()
    }
}

struct ReceiveLoop {
    shared: Arc<Shared>,
    alive: Arc<AtomicBool>,
    registry: Arc<StreamRegistry>,
    incoming: mpsc::Receiver<Incoming>,
    readers: HashMap<Token, FrameReader<IpcStream>>,
    waker: UnixStream,
}

impl ReceiveLoop {
    fn run(mut self) -> Result<()> {
        info!("starting IPC receive thread");
        let result = self.poll_until_stopped();
        self.teardown();
        result
    }

    fn poll_until_stopped(&mut self) -> Result<()> {
        let mut events: Vec<Event> = Vec::new();
        loop {
            self.wait(&mut events)?;
            self.adopt_incoming();

            for event in &events {
                if event.token == WAKER_TOKEN {
                    self.drain_waker();
                    continue;
                }
                self.on_ready(event);
            }

            if self.shared.stop.load(Ordering::SeqCst) {
                return Ok(());
            }
        }
    }

    fn wait(&self, events: &mut Vec<Event>) -> Result<()> {
        #[cfg(test)]
        if self.shared.fail_next_wait.swap(false, Ordering::SeqCst) {
            return Err(ggipc_transport::TransportError::PollWait(std::io::Error::other(
                "injected poller failure",
            ))
            .into());
        }
        self.shared.poller.wait(events, None)?;
        Ok(())
    }

    /// Close every connection and fail every stream still waiting.
    fn teardown(&mut self) {
        self.alive.store(false, Ordering::SeqCst);
        self.adopt_incoming();

        let connections = self.readers.len();
        let tokens: Vec<Token> = self.readers.keys().copied().collect();
        for token in tokens {
            self.close(token);
        }
        let abandoned = self.registry.abandon_all();
        info!(connections, abandoned, "IPC receive thread stopped");
    }

    fn adopt_incoming(&mut self) {
        while let Ok(request) = self.incoming.try_recv() {
            match request {
                Incoming::Adopt { token, reader } => {
                    self.readers.insert(token, reader);
                }
                Incoming::Forget(token) => {
                    self.readers.remove(&token);
                }
            }
        }
    }

    fn drain_waker(&mut self) {
        let mut buf = [0u8; 16];
        while matches!(self.waker.read(&mut buf), Ok(n) if n > 0) {}
    }

    fn on_ready(&mut self, event: &Event) {
        let conn = ConnectionId(event.token.0);
        if event.hangup && !event.readable {
            debug!(%conn, "IPC connection hung up");
            self.close(event.token);
            return;
        }

        let Some(reader) = self.readers.get_mut(&event.token) else {
            warn!(%conn, "readiness for unknown connection ignored");
            return;
        };

        if let Err(err) = forward_incoming_frame(&self.registry, reader) {
            error!(%conn, %err, "error receiving from IPC connection; closing connection");
            self.close(event.token);
        }
    }

    fn close(&mut self, token: Token) {
        let Some(reader) = self.readers.remove(&token) else {
            return;
        };
        let conn = ConnectionId(token.0);
        let stream = reader.into_inner();

        if let Err(err) = self.shared.poller.delete(stream.as_raw_fd()) {
            warn!(%conn, %err, "failed to remove connection from poller");
        }
        if let Err(err) = stream.shutdown() {
            warn!(%conn, %err, "failed to shut down connection");
        }
        debug!(%conn, "closed IPC connection");
    }
}
