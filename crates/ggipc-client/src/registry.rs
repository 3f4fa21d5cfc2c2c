//! Bounded table of in-flight streams.
//!
//! Application threads allocate and release slots while the receive thread
//! resolves every inbound frame against the same table. All access goes
//! through one re-entrant lock, and the lock stays held while a handler
//! runs: once [`StreamRegistry::clear_if_matches`] returns, the released
//! handler is never invoked again. Handlers may call back into the registry
//! (for example to release their own slot) without deadlocking.

use std::cell::RefCell;
use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use ggipc_frame::CommonHeaders;
use parking_lot::ReentrantMutex;
use tracing::{debug, error};

use crate::config::MIN_STREAMS;
use crate::error::{ClientError, HandlerError, Result};

/// Identifier of a logical stream. Only positive ids are ever active.
pub type StreamId = i32;

const UNUSED: StreamId = 0;
const FIRST_STREAM_ID: StreamId = 1;
const CONTROL_SLOT: usize = 0;

/// Which call shape a handler serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerKind {
    /// Fulfils one waiting synchronous caller.
    Response,
    /// Receives every event published on a subscription.
    Subscription,
}

/// Callback invoked by the receive thread for frames on a registered stream.
///
/// State the registrant needs on every invocation lives inside the handler
/// object itself; the registry only keeps the `Arc` and compares it by
/// identity. Handlers run on the receive thread and block delivery to every
/// other stream while they run, so they must not wait on replies.
pub trait StreamHandler: Send + Sync {
    /// Call shape served by this handler.
    fn kind(&self) -> HandlerKind;

    /// Handle one frame. An error closes the connection it arrived on.
    fn on_frame(
        &self,
        stream: &ActiveStream<'_>,
        headers: &CommonHeaders,
        body: &Bytes,
    ) -> std::result::Result<(), HandlerError>;

    /// The stream was released because no further frames can arrive for it:
    /// the receive thread has stopped.
    fn on_abandoned(&self) {}
}

/// Shared handle to a registered handler.
pub type HandlerRef = Arc<dyn StreamHandler>;

/// The stream a handler is being invoked for.
pub struct ActiveStream<'a> {
    registry: &'a StreamRegistry,
    id: StreamId,
    handler: &'a HandlerRef,
}

impl ActiveStream<'_> {
    /// Id of the stream being dispatched.
    pub fn id(&self) -> StreamId {
        self.id
    }

    /// Release this stream's slot if it still belongs to the running handler.
    pub fn release(&self) -> bool {
        self.registry.clear_if_matches(self.id, self.handler)
    }

    /// The registry the stream lives in.
    pub fn registry(&self) -> &StreamRegistry {
        self.registry
    }
}

/// Result of resolving one frame against the registry.
#[derive(Debug)]
pub enum DispatchOutcome {
    /// A handler ran and returned this status.
    Handled(std::result::Result<(), HandlerError>),
    /// No active slot carries the frame's stream id.
    Unmatched,
}

#[derive(Default)]
struct Slot {
    stream_id: StreamId,
    handler: Option<HandlerRef>,
}

impl Slot {
    fn is_active(&self) -> bool {
        self.stream_id > UNUSED
    }
}

struct Table {
    slots: Vec<Slot>,
    next_id: StreamId,
}

impl Table {
    fn index_of(&self, stream_id: StreamId) -> Option<usize> {
        if stream_id <= UNUSED {
            return None;
        }
        self.slots
            .iter()
            .position(|slot| slot.is_active() && slot.stream_id == stream_id)
    }

    /// Next id from the counter, wrapping from `i32::MAX` back to 1 and
    /// skipping ids that are still active.
    fn mint_id(&mut self) -> StreamId {
        loop {
            let candidate = self.next_id;
            self.next_id = if candidate == StreamId::MAX {
                FIRST_STREAM_ID
            } else {
                candidate + 1
            };
            if self.index_of(candidate).is_none() {
                return candidate;
            }
        }
    }
}

/// Fixed-capacity registry of active streams.
pub struct StreamRegistry {
    table: ReentrantMutex<RefCell<Table>>,
    capacity: usize,
}

impl StreamRegistry {
    /// Create a registry with `capacity` slots. Slot 0 is reserved for the
    /// control stream, so `capacity - 1` streams can be active at once.
    pub fn new(capacity: usize) -> Result<Self> {
        Self::with_first_id(capacity, FIRST_STREAM_ID)
    }

    fn with_first_id(capacity: usize, first_id: StreamId) -> Result<Self> {
        if capacity < MIN_STREAMS {
            return Err(ClientError::InvalidCapacity {
                requested: capacity,
                min: MIN_STREAMS,
            });
        }
        let slots = (0..capacity).map(|_| Slot::default()).collect();
        Ok(Self {
            table: ReentrantMutex::new(RefCell::new(Table {
                slots,
                next_id: first_id,
            })),
            capacity,
        })
    }

    /// Total number of slots, including the reserved one.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of currently active streams.
    pub fn active_count(&self) -> usize {
        let guard = self.table.lock();
        let table = guard.borrow();
        table.slots.iter().filter(|slot| slot.is_active()).count()
    }

    /// Index of the active slot holding `stream_id`.
    pub fn find_slot(&self, stream_id: StreamId) -> Option<usize> {
        let guard = self.table.lock();
        let table = guard.borrow();
        table.index_of(stream_id)
    }

    /// True if `stream_id` is active and still bound to `handler`.
    pub fn holds(&self, stream_id: StreamId, handler: &HandlerRef) -> bool {
        let guard = self.table.lock();
        let table = guard.borrow();
        table
            .index_of(stream_id)
            .and_then(|index| table.slots[index].handler.as_ref())
            .is_some_and(|stored| Arc::ptr_eq(stored, handler))
    }

    /// Claim the first free slot for `handler` and mint a fresh stream id.
    pub fn allocate(&self, handler: HandlerRef) -> Result<StreamId> {
        let guard = self.table.lock();
        let mut table = guard.borrow_mut();

        let free = (CONTROL_SLOT + 1..table.slots.len()).find(|&i| !table.slots[i].is_active());
        let Some(index) = free else {
            error!(
                capacity = self.capacity,
                "exceeded maximum concurrent IPC streams"
            );
            return Err(ClientError::StreamsExhausted {
                capacity: self.capacity,
            });
        };

        let stream_id = table.mint_id();
        debug!(stream_id, slot = index, kind = ?handler.kind(), "allocated stream");
        table.slots[index] = Slot {
            stream_id,
            handler: Some(handler),
        };
        Ok(stream_id)
    }

    /// Replace the handler of an active stream in place.
    ///
    /// An unknown id is a caller bug: it is logged and ignored.
    pub fn set_handler(&self, stream_id: StreamId, handler: HandlerRef) {
        let guard = self.table.lock();
        let mut table = guard.borrow_mut();

        match table.index_of(stream_id) {
            Some(index) => table.slots[index].handler = Some(handler),
            None => error!(stream_id, "set_handler on unknown stream; ignored"),
        }
    }

    /// Release `stream_id` only if it is still bound to `handler`.
    ///
    /// Returns whether the slot was released. A stale release from a
    /// previous owner leaves a reallocated slot untouched.
    pub fn clear_if_matches(&self, stream_id: StreamId, handler: &HandlerRef) -> bool {
        let guard = self.table.lock();
        let mut table = guard.borrow_mut();

        let Some(index) = table.index_of(stream_id) else {
            return false;
        };
        let slot = &mut table.slots[index];
        let matches = slot
            .handler
            .as_ref()
            .is_some_and(|stored| Arc::ptr_eq(stored, handler));
        if matches {
            *slot = Slot::default();
            debug!(stream_id, slot = index, "released stream");
        }
        matches
    }

    /// Resolve a frame to its stream and run the handler.
    ///
    /// The lock is held for the whole call; the table itself is not
    /// borrowed while the handler runs, so the handler can re-enter.
    pub fn dispatch(&self, headers: &CommonHeaders, body: &Bytes) -> DispatchOutcome {
        let guard = self.table.lock();

        let handler = {
            let table = guard.borrow();
            table
                .index_of(headers.stream_id)
                .and_then(|index| table.slots[index].handler.clone())
        };
        let Some(handler) = handler else {
            return DispatchOutcome::Unmatched;
        };

        let stream = ActiveStream {
            registry: self,
            id: headers.stream_id,
            handler: &handler,
        };
        let result = handler.on_frame(&stream, headers, body);
        drop(guard);
        DispatchOutcome::Handled(result)
    }

    /// Release every active stream and notify its handler through
    /// [`StreamHandler::on_abandoned`]. Returns how many were released.
    pub fn abandon_all(&self) -> usize {
        let guard = self.table.lock();

        let abandoned: Vec<(StreamId, HandlerRef)> = {
            let mut table = guard.borrow_mut();
            table
                .slots
                .iter_mut()
                .filter(|slot| slot.is_active())
                .filter_map(|slot| {
                    let slot = std::mem::take(slot);
                    slot.handler.map(|handler| (slot.stream_id, handler))
                })
                .collect()
        };
        for (stream_id, handler) in &abandoned {
            debug!(stream_id, "abandoned stream");
            handler.on_abandoned();
        }
        abandoned.len()
    }
}

impl fmt::Debug for StreamRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamRegistry")
            .field("capacity", &self.capacity)
            .field("active", &self.active_count())
            .finish()
    }
}
