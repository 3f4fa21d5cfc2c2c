//! Request side of a connection: synchronous calls and subscriptions.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use ggipc_frame::{CommonHeaders, FrameWriter};
use ggipc_transport::IpcStream;
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::call::{PendingCall, SubscriptionCallback, SubscriptionStream};
use crate::config::ClientConfig;
use crate::dispatch::ConnectionId;
use crate::envelope::RequestEnvelope;
use crate::error::{ClientError, Result};
use crate::registry::{HandlerRef, StreamId, StreamRegistry};

/// A connection whose read side is owned by the receive thread.
///
/// Requests from any number of threads share one writer; each request runs
/// on its own stream id. Obtained from [`crate::IpcClient::attach`].
pub struct Connection {
    id: ConnectionId,
    registry: Arc<StreamRegistry>,
    writer: Mutex<FrameWriter<IpcStream>>,
    receiving: Arc<AtomicBool>,
    call_timeout: Duration,
}

impl Connection {
    pub(crate) fn new(
        id: ConnectionId,
        registry: Arc<StreamRegistry>,
        writer: FrameWriter<IpcStream>,
        receiving: Arc<AtomicBool>,
        config: &ClientConfig,
    ) -> Self {
        Self {
            id,
            registry,
            writer: Mutex::new(writer),
            receiving,
            call_timeout: config.call_timeout,
        }
    }

    /// False once the receive thread has stopped; requests then fail with
    /// [`ClientError::DispatcherStopped`].
    pub fn is_receiving(&self) -> bool {
        self.receiving.load(Ordering::SeqCst)
    }

    /// Id the receive thread knows this connection by.
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Call `operation` and wait for its reply using the configured timeout.
    pub fn call(&self, operation: &str, payload: serde_json::Value) -> Result<serde_json::Value> {
        self.call_with_timeout(operation, payload, self.call_timeout)
    }

    /// Call `operation` and wait up to `timeout` for its reply.
    ///
    /// On timeout the stream is released, so a reply arriving later is
    /// dropped by the receive thread as unmatched.
    pub fn call_with_timeout(
        &self,
        operation: &str,
        payload: serde_json::Value,
        timeout: Duration,
    ) -> Result<serde_json::Value> {
        let pending = Arc::new(PendingCall::default());
        let handler: HandlerRef = pending.clone();
        let stream_id = self.open_stream(&handler, operation, payload)?;

        if let Some(reply) = pending.wait(timeout) {
            return reply;
        }
        if self.registry.clear_if_matches(stream_id, &handler) {
            warn!(conn = %self.id, stream_id, operation, ?timeout, "call timed out");
            return Err(ClientError::Timeout(timeout));
        }
        // The reply won the race against the release; the handler has
        // already stored it.
        pending.take().unwrap_or(Err(ClientError::Timeout(timeout)))
    }

    /// Subscribe to `operation`, waiting for the acknowledgement using the
    /// configured timeout.
    pub fn subscribe<C>(
        &self,
        operation: &str,
        payload: serde_json::Value,
        callback: C,
    ) -> Result<Subscription>
    where
        C: SubscriptionCallback + 'static,
    {
        self.subscribe_with_timeout(operation, payload, callback, self.call_timeout)
    }

    /// Subscribe to `operation`, waiting up to `timeout` for the
    /// acknowledgement. Events after the acknowledgement go to `callback` on
    /// the receive thread.
    pub fn subscribe_with_timeout<C>(
        &self,
        operation: &str,
        payload: serde_json::Value,
        callback: C,
        timeout: Duration,
    ) -> Result<Subscription>
    where
        C: SubscriptionCallback + 'static,
    {
        let stream = Arc::new(SubscriptionStream::new(Box::new(callback)));
        let handler: HandlerRef = stream.clone();
        let stream_id = self.open_stream(&handler, operation, payload)?;

        let ack = match stream.wait_ack(timeout) {
            Some(ack) => ack,
            None if self.registry.clear_if_matches(stream_id, &handler) => {
                warn!(conn = %self.id, stream_id, operation, ?timeout, "subscription not acknowledged");
                return Err(ClientError::Timeout(timeout));
            }
            None => stream
                .wait_ack(Duration::ZERO)
                .unwrap_or(Err(ClientError::Timeout(timeout))),
        };
        ack?;

        debug!(conn = %self.id, stream_id, operation, "subscribed");
        Ok(Subscription {
            registry: Arc::clone(&self.registry),
            stream_id,
            handler,
        })
    }

    fn open_stream(
        &self,
        handler: &HandlerRef,
        operation: &str,
        payload: serde_json::Value,
    ) -> Result<StreamId> {
        if !self.receiving.load(Ordering::SeqCst) {
            return Err(ClientError::DispatcherStopped);
        }
        let stream_id = self.registry.allocate(Arc::clone(handler))?;
        // The receive thread abandons every stream as it stops; a slot claimed
        // after that would never be answered.
        if !self.receiving.load(Ordering::SeqCst) {
            self.registry.clear_if_matches(stream_id, handler);
            return Err(ClientError::DispatcherStopped);
        }
        if let Err(err) = self.send_request(stream_id, operation, payload) {
            self.registry.clear_if_matches(stream_id, handler);
            return Err(err);
        }
        Ok(stream_id)
    }

    fn send_request(
        &self,
        stream_id: StreamId,
        operation: &str,
        payload: serde_json::Value,
    ) -> Result<()> {
        let body = serde_json::to_vec(&RequestEnvelope::new(operation, payload))?;
        self.writer
            .lock()
            .send(&CommonHeaders::application(stream_id), &body)?;
        debug!(conn = %self.id, stream_id, operation, bytes = body.len(), "request sent");
        Ok(())
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("call_timeout", &self.call_timeout)
            .finish()
    }
}

/// An acknowledged subscription. Dropping it stops event delivery.
pub struct Subscription {
    registry: Arc<StreamRegistry>,
    stream_id: StreamId,
    handler: HandlerRef,
}

impl Subscription {
    /// Stream id the events arrive on.
    pub fn stream_id(&self) -> StreamId {
        self.stream_id
    }

    /// False once the remote side terminated the stream or it was released.
    pub fn is_active(&self) -> bool {
        self.registry.holds(self.stream_id, &self.handler)
    }

    /// Stop receiving events. Returns false if the stream had already ended.
    ///
    /// No event is delivered to the callback after this returns.
    pub fn unsubscribe(self) -> bool {
        self.release()
    }

    fn release(&self) -> bool {
        self.registry.clear_if_matches(self.stream_id, &self.handler)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("stream_id", &self.stream_id)
            .field("active", &self.is_active())
            .finish()
    }
}
