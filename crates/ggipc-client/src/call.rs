//! Stream handlers behind the two call shapes: a one-shot response for a
//! synchronous call, and a long-lived subscription.

use std::time::{Duration, Instant};

use bytes::Bytes;
use ggipc_frame::{CommonHeaders, MessageFlags, MessageKind};
use parking_lot::{Condvar, Mutex};
use tracing::{debug, error, warn};

use crate::envelope::ErrorBody;
use crate::error::{ClientError, HandlerError, Result};
use crate::registry::{ActiveStream, HandlerKind, StreamHandler};

fn remote_error(body: &Bytes) -> std::result::Result<ClientError, HandlerError> {
    let err: ErrorBody = serde_json::from_slice(body)?;
    Ok(ClientError::Remote {
        code: err.error_code,
        message: err.message,
    })
}

/// Waits on `cond` until `done` holds for the guarded state or `deadline` passes.
fn wait_until<T>(
    cond: &Condvar,
    guard: &mut parking_lot::MutexGuard<'_, T>,
    deadline: Instant,
    done: impl Fn(&T) -> bool,
) {
    while !done(guard) {
        if cond.wait_until(guard, deadline).timed_out() {
            break;
        }
    }
}

/// Handler for one synchronous request: stores the terminal reply and wakes
/// the caller.
#[derive(Default)]
pub(crate) struct PendingCall {
    reply: Mutex<Option<Result<serde_json::Value>>>,
    ready: Condvar,
}

impl PendingCall {
    fn complete(&self, reply: Result<serde_json::Value>) {
        *self.reply.lock() = Some(reply);
        self.ready.notify_all();
    }

    /// Block until the reply arrives or `timeout` elapses.
    pub(crate) fn wait(&self, timeout: Duration) -> Option<Result<serde_json::Value>> {
        let mut reply = self.reply.lock();
        wait_until(&self.ready, &mut reply, Instant::now() + timeout, |r| {
            r.is_some()
        });
        reply.take()
    }

    /// Take a reply that landed without waiting.
    pub(crate) fn take(&self) -> Option<Result<serde_json::Value>> {
        self.reply.lock().take()
    }
}

impl StreamHandler for PendingCall {
    fn kind(&self) -> HandlerKind {
        HandlerKind::Response
    }

    fn on_frame(
        &self,
        stream: &ActiveStream<'_>,
        headers: &CommonHeaders,
        body: &Bytes,
    ) -> std::result::Result<(), HandlerError> {
        let parsed = match headers.kind {
            MessageKind::ApplicationMessage => serde_json::from_slice::<serde_json::Value>(body)
                .map(Ok)
                .map_err(HandlerError::from),
            MessageKind::ApplicationError => remote_error(body).map(Err),
            other => Err(HandlerError::Unexpected(other)),
        };

        // Terminal frame either way: release before waking the caller.
        stream.release();
        match parsed {
            Ok(reply) => {
                debug!(stream_id = stream.id(), "call completed");
                self.complete(reply);
                Ok(())
            }
            Err(err) => {
                self.complete(Err(ClientError::MalformedResponse(err.to_string())));
                Err(err)
            }
        }
    }

    fn on_abandoned(&self) {
        self.complete(Err(ClientError::DispatcherStopped));
    }
}

/// Receives the events of an established subscription.
///
/// Callbacks run on the receive thread. They must return promptly and must
/// not make synchronous calls: the reply could only be delivered by the
/// thread the callback is blocking.
pub trait SubscriptionCallback: Send + Sync {
    /// One published event.
    fn on_event(&self, event: serde_json::Value) -> std::result::Result<(), HandlerError>;

    /// The remote side ended the subscription.
    fn on_close(&self) {}
}

impl<F> SubscriptionCallback for F
where
    F: Fn(serde_json::Value) -> std::result::Result<(), HandlerError> + Send + Sync,
{
    fn on_event(&self, event: serde_json::Value) -> std::result::Result<(), HandlerError> {
        self(event)
    }
}

enum AckState {
    Pending,
    Accepted,
    Rejected(ClientError),
    Taken,
}

/// Handler for a subscription stream. The first frame acknowledges or
/// rejects the subscription; later frames are events.
pub(crate) struct SubscriptionStream {
    ack: Mutex<AckState>,
    acked: Condvar,
    callback: Box<dyn SubscriptionCallback>,
}

impl SubscriptionStream {
    pub(crate) fn new(callback: Box<dyn SubscriptionCallback>) -> Self {
        Self {
            ack: Mutex::new(AckState::Pending),
            acked: Condvar::new(),
            callback,
        }
    }

    fn settle(&self, state: AckState) {
        *self.ack.lock() = state;
        self.acked.notify_all();
    }

    /// Block until the subscription is acknowledged or rejected.
    ///
    /// `None` means no answer arrived within `timeout`.
    pub(crate) fn wait_ack(&self, timeout: Duration) -> Option<Result<()>> {
        let mut ack = self.ack.lock();
        wait_until(&self.acked, &mut ack, Instant::now() + timeout, |a| {
            !matches!(a, AckState::Pending)
        });
        match std::mem::replace(&mut *ack, AckState::Taken) {
            AckState::Pending => {
                *ack = AckState::Pending;
                None
            }
            AckState::Accepted => {
                *ack = AckState::Accepted;
                Some(Ok(()))
            }
            AckState::Rejected(err) => Some(Err(err)),
            AckState::Taken => Some(Err(ClientError::SubscriptionClosed)),
        }
    }

    fn is_accepted(&self) -> bool {
        matches!(*self.ack.lock(), AckState::Accepted)
    }

    fn on_ack_frame(
        &self,
        stream: &ActiveStream<'_>,
        headers: &CommonHeaders,
        body: &Bytes,
    ) -> std::result::Result<(), HandlerError> {
        match headers.kind {
            MessageKind::ApplicationMessage
                if headers.flags.contains(MessageFlags::TERMINATE_STREAM) =>
            {
                stream.release();
                self.settle(AckState::Rejected(ClientError::SubscriptionClosed));
                Ok(())
            }
            MessageKind::ApplicationMessage => {
                debug!(stream_id = stream.id(), "subscription accepted");
                self.settle(AckState::Accepted);
                Ok(())
            }
            MessageKind::ApplicationError => {
                stream.release();
                match remote_error(body) {
                    Ok(err) => {
                        warn!(stream_id = stream.id(), %err, "subscription rejected");
                        self.settle(AckState::Rejected(err));
                        Ok(())
                    }
                    Err(err) => {
                        self.settle(AckState::Rejected(ClientError::MalformedResponse(
                            err.to_string(),
                        )));
                        Err(err)
                    }
                }
            }
            other => {
                stream.release();
                self.settle(AckState::Rejected(ClientError::MalformedResponse(format!(
                    "unexpected {} frame",
                    other.name()
                ))));
                Err(HandlerError::Unexpected(other))
            }
        }
    }
}

impl StreamHandler for SubscriptionStream {
    fn kind(&self) -> HandlerKind {
        HandlerKind::Subscription
    }

    fn on_abandoned(&self) {
        if self.is_accepted() {
            self.callback.on_close();
        } else {
            self.settle(AckState::Rejected(ClientError::DispatcherStopped));
        }
    }

    fn on_frame(
        &self,
        stream: &ActiveStream<'_>,
        headers: &CommonHeaders,
        body: &Bytes,
    ) -> std::result::Result<(), HandlerError> {
        if !self.is_accepted() {
            return self.on_ack_frame(stream, headers, body);
        }

        let terminate = headers.flags.contains(MessageFlags::TERMINATE_STREAM);
        let result = match headers.kind {
            // A terminating frame may carry no event.
            MessageKind::ApplicationMessage if terminate && body.is_empty() => Ok(()),
            MessageKind::ApplicationMessage => serde_json::from_slice(body)
                .map_err(HandlerError::from)
                .and_then(|event| self.callback.on_event(event)),
            MessageKind::ApplicationError => {
                match remote_error(body) {
                    Ok(err) => error!(stream_id = stream.id(), %err, "subscription error"),
                    Err(err) => error!(stream_id = stream.id(), %err, "malformed subscription error"),
                }
                stream.release();
                self.callback.on_close();
                return Ok(());
            }
            other => Err(HandlerError::Unexpected(other)),
        };

        if terminate {
            debug!(stream_id = stream.id(), "subscription terminated by remote");
            stream.release();
            self.callback.on_close();
        }
        result
    }
}
