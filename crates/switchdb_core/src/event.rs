//! Cache change events and their dispatcher.
//!
//! The apply path posts events into a bounded queue; a single dispatcher
//! thread pops them and invokes every registered handler synchronously, in
//! registration order. A full queue never blocks the apply path: the event
//! is dropped, logged, and counted.

use crate::model::Model;
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{sync_channel, SyncSender, TrySendError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::warn;
use uuid::Uuid;

/// What happened to a row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    /// The row appeared in the cache.
    Add,
    /// The row's contents changed.
    Update,
    /// The row left the cache.
    Delete,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            EventKind::Add => "add",
            EventKind::Update => "update",
            EventKind::Delete => "delete",
        })
    }
}

/// One cache change, carrying the affected row's states as models.
pub struct Event {
    /// The change class.
    pub kind: EventKind,
    /// The table the row belongs to.
    pub table: String,
    /// The row identifier.
    pub uuid: Uuid,
    /// State before the change; `None` for adds.
    pub old: Option<Box<dyn Model>>,
    /// State after the change; `None` for deletes.
    pub new: Option<Box<dyn Model>>,
}

impl fmt::Debug for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Event")
            .field("kind", &self.kind)
            .field("table", &self.table)
            .field("uuid", &self.uuid)
            .finish_non_exhaustive()
    }
}

/// A consumer of cache change events.
///
/// Handlers run on the dispatcher thread and must not block indefinitely;
/// a stalled handler stalls every handler behind it.
pub trait EventHandler: Send {
    /// Called once per event, in queue order.
    fn handle(&mut self, event: &Event);
}

impl<F: FnMut(&Event) + Send> EventHandler for F {
    fn handle(&mut self, event: &Event) {
        self(event);
    }
}

type Handlers = Arc<Mutex<Vec<Box<dyn EventHandler>>>>;

/// The producer half held by the cache.
#[derive(Clone)]
pub struct EventSink {
    tx: SyncSender<Event>,
    dropped: Arc<AtomicU64>,
}

impl EventSink {
    /// Posts an event without blocking. On a full queue the event is
    /// dropped and accounted for.
    pub fn post(&self, event: Event) {
        match self.tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(
                    kind = %event.kind,
                    table = %event.table,
                    uuid = %event.uuid,
                    "event queue full, dropping event"
                );
            }
            Err(TrySendError::Disconnected(_)) => {}
        }
    }
}

/// Bounded event queue plus its dispatcher thread.
pub struct EventProcessor {
    tx: Option<SyncSender<Event>>,
    dropped: Arc<AtomicU64>,
    handlers: Handlers,
    dispatcher: Option<JoinHandle<()>>,
}

impl EventProcessor {
    /// Starts a processor whose queue holds at most `capacity` events.
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = sync_channel::<Event>(capacity);
        let handlers: Handlers = Arc::new(Mutex::new(Vec::new()));
        let dispatcher_handlers = Arc::clone(&handlers);
        let dispatcher = thread::Builder::new()
            .name("switchdb-events".to_string())
            .spawn(move || {
                while let Ok(event) = rx.recv() {
                    let mut handlers = dispatcher_handlers.lock();
                    for handler in handlers.iter_mut() {
                        handler.handle(&event);
                    }
                }
            })
            .ok();

        Self {
            tx: Some(tx),
            dropped: Arc::new(AtomicU64::new(0)),
            handlers,
            dispatcher,
        }
    }

    /// Registers a handler. Handlers run in registration order.
    pub fn add_handler(&self, handler: Box<dyn EventHandler>) {
        self.handlers.lock().push(handler);
    }

    /// Removes every registered handler.
    pub fn clear_handlers(&self) {
        self.handlers.lock().clear();
    }

    /// A producer handle for the apply path.
    pub fn sink(&self) -> Option<EventSink> {
        self.tx.as_ref().map(|tx| EventSink {
            tx: tx.clone(),
            dropped: Arc::clone(&self.dropped),
        })
    }

    /// How many events have been dropped on a full queue so far.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl Drop for EventProcessor {
    fn drop(&mut self) {
        // The dispatcher exits once every sender is gone.
        self.tx.take();
        if let Some(handle) = self.dispatcher.take() {
            if Arc::strong_count(&self.dropped) == 1 {
                let _ = handle.join();
            }
        }
    }
}
