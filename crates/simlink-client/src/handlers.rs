//! Callback handlers invoked during dispatch.
//!
//! Each event category keeps its own list of handlers. A handler runs
//! synchronously on the dispatch task, so it should return quickly; anything
//! slow belongs in a [`Subscription`](crate::Subscription) instead.
//!
//! ## Invocation rules
//!
//! - The list is copied under a read lock and the lock is released before any
//!   handler runs, so a handler may register or remove handlers itself.
//! - Every invocation is wrapped in [`std::panic::catch_unwind`]. A panicking
//!   handler is logged and counted; the remaining handlers still run.
//!
//! ## Usage
//!
//! ```rust,no_run
//! # use simlink_client::{ClientConfig, SimClient};
//! # use simlink_transport_traits::ChannelSource;
//! # let (source, _feed) = ChannelSource::new();
//! # let client = SimClient::new(source, ClientConfig::default()).unwrap();
//! let id = client.on_pause(|paused| println!("paused: {paused}"));
//! // ...
//! client.remove_handler(id);
//! ```

use std::any::Any;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use simlink_transport_traits::{Envelope, ObjectEvent, OpenInfo};
use smallvec::SmallVec;
use tracing::{debug, error};

use crate::custom_events::CustomEvent;
use crate::metrics::ClientMetrics;
use crate::state::{ConnectionStateChange, SimStateChange};

/// Called on every connection state transition.
pub type ConnectionStateHandler = dyn Fn(ConnectionStateChange) + Send + Sync;

/// Called when the significant part of the simulator state changes.
pub type SimStateHandler = dyn Fn(&SimStateChange) + Send + Sync;

/// Called with every dispatched envelope.
pub type MessageHandler = dyn Fn(&Envelope) + Send + Sync;

/// Called when the simulator reports the session ready.
pub type OpenHandler = dyn Fn(&OpenInfo) + Send + Sync;

/// Called when the simulator reports it is quitting.
pub type QuitHandler = dyn Fn() + Send + Sync;

/// Called with the file name of a flight, aircraft or flight plan event.
pub type FilenameHandler = dyn Fn(&str) + Send + Sync;

/// Called when an object is added or removed.
pub type ObjectHandler = dyn Fn(&ObjectEvent) + Send + Sync;

/// Called with the new value of a boolean flag (pause, running, crashed).
pub type FlagHandler = dyn Fn(bool) + Send + Sync;

/// Called with the new value of a numeric field (sound, view).
pub type ValueHandler = dyn Fn(u32) + Send + Sync;

/// Called when a custom event fires.
pub type CustomEventHandler = dyn Fn(&CustomEvent) + Send + Sync;

/// The list a handler belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandlerCategory {
    /// Connection state transitions
    ConnectionState,
    /// Simulator state changes
    SimState,
    /// Every envelope
    Message,
    /// Session ready
    Open,
    /// Simulator quitting
    Quit,
    /// Flight file loaded
    FlightLoaded,
    /// Aircraft file loaded
    AircraftLoaded,
    /// Flight plan activated
    FlightPlanActivated,
    /// Object added
    ObjectAdded,
    /// Object removed
    ObjectRemoved,
    /// Pause toggled
    Pause,
    /// Simulation started or stopped
    SimRunning,
    /// Crash state changed
    Crashed,
    /// Sound id changed
    Sound,
    /// View id changed
    View,
    /// Custom event fired
    CustomEvent,
}

impl fmt::Display for HandlerCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Opaque id returned by handler registration, used for removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId {
    category: HandlerCategory,
    seq: u64,
}

impl HandlerId {
    /// The list this handler was registered in.
    pub const fn category(&self) -> HandlerCategory {
        self.category
    }
}

/// Extracts a readable message from a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Append/remove list of handlers for one category.
pub(crate) struct HandlerList<F: ?Sized> {
    category: HandlerCategory,
    entries: RwLock<Vec<(u64, Arc<F>)>>,
}

impl<F: ?Sized> HandlerList<F> {
    fn new(category: HandlerCategory) -> Self {
        Self {
            category,
            entries: RwLock::new(Vec::new()),
        }
    }

    fn add(&self, seq: u64, handler: Arc<F>) -> HandlerId {
        self.entries.write().push((seq, handler));
        debug!(category = %self.category, seq, "Handler registered");
        HandlerId {
            category: self.category,
            seq,
        }
    }

    fn remove(&self, seq: u64) -> bool {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|(id, _)| *id != seq);
        let removed = entries.len() != before;
        if removed {
            debug!(category = %self.category, seq, "Handler removed");
        }
        removed
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    fn snapshot(&self) -> SmallVec<[Arc<F>; 4]> {
        self.entries
            .read()
            .iter()
            .map(|(_, handler)| Arc::clone(handler))
            .collect()
    }

    /// Runs `call` once per handler, outside the lock, containing panics.
    pub(crate) fn invoke(&self, metrics: &ClientMetrics, mut call: impl FnMut(&F)) {
        if self.is_empty() {
            return;
        }
        for handler in self.snapshot() {
            if let Err(payload) = catch_unwind(AssertUnwindSafe(|| call(&handler))) {
                ClientMetrics::incr(&metrics.handler_panics);
                error!(
                    category = %self.category,
                    panic = %panic_message(payload.as_ref()),
                    "Handler panicked"
                );
            }
        }
    }
}

impl<F: ?Sized> fmt::Debug for HandlerList<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerList")
            .field("category", &self.category)
            .field("len", &self.len())
            .finish()
    }
}

/// Every handler list of one client.
#[derive(Debug)]
pub(crate) struct HandlerRegistry {
    next_seq: AtomicU64,
    pub(crate) connection_state: HandlerList<ConnectionStateHandler>,
    pub(crate) sim_state: HandlerList<SimStateHandler>,
    pub(crate) message: HandlerList<MessageHandler>,
    pub(crate) open: HandlerList<OpenHandler>,
    pub(crate) quit: HandlerList<QuitHandler>,
    pub(crate) flight_loaded: HandlerList<FilenameHandler>,
    pub(crate) aircraft_loaded: HandlerList<FilenameHandler>,
    pub(crate) flight_plan_activated: HandlerList<FilenameHandler>,
    pub(crate) object_added: HandlerList<ObjectHandler>,
    pub(crate) object_removed: HandlerList<ObjectHandler>,
    pub(crate) pause: HandlerList<FlagHandler>,
    pub(crate) sim_running: HandlerList<FlagHandler>,
    pub(crate) crashed: HandlerList<FlagHandler>,
    pub(crate) sound: HandlerList<ValueHandler>,
    pub(crate) view: HandlerList<ValueHandler>,
    pub(crate) custom_event: HandlerList<CustomEventHandler>,
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        use HandlerCategory as C;
        Self {
            next_seq: AtomicU64::new(1),
            connection_state: HandlerList::new(C::ConnectionState),
            sim_state: HandlerList::new(C::SimState),
            message: HandlerList::new(C::Message),
            open: HandlerList::new(C::Open),
            quit: HandlerList::new(C::Quit),
            flight_loaded: HandlerList::new(C::FlightLoaded),
            aircraft_loaded: HandlerList::new(C::AircraftLoaded),
            flight_plan_activated: HandlerList::new(C::FlightPlanActivated),
            object_added: HandlerList::new(C::ObjectAdded),
            object_removed: HandlerList::new(C::ObjectRemoved),
            pause: HandlerList::new(C::Pause),
            sim_running: HandlerList::new(C::SimRunning),
            crashed: HandlerList::new(C::Crashed),
            sound: HandlerList::new(C::Sound),
            view: HandlerList::new(C::View),
            custom_event: HandlerList::new(C::CustomEvent),
        }
    }
}

impl HandlerRegistry {
    /// Adds `handler` to `list` under a fresh id.
    pub(crate) fn register<F: ?Sized>(&self, list: &HandlerList<F>, handler: Arc<F>) -> HandlerId {
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        list.add(seq, handler)
    }

    /// Removes a handler. Returns `false` if it was already gone.
    pub(crate) fn remove(&self, id: HandlerId) -> bool {
        use HandlerCategory as C;
        match id.category {
            C::ConnectionState => self.connection_state.remove(id.seq),
            C::SimState => self.sim_state.remove(id.seq),
            C::Message => self.message.remove(id.seq),
            C::Open => self.open.remove(id.seq),
            C::Quit => self.quit.remove(id.seq),
            C::FlightLoaded => self.flight_loaded.remove(id.seq),
            C::AircraftLoaded => self.aircraft_loaded.remove(id.seq),
            C::FlightPlanActivated => self.flight_plan_activated.remove(id.seq),
            C::ObjectAdded => self.object_added.remove(id.seq),
            C::ObjectRemoved => self.object_removed.remove(id.seq),
            C::Pause => self.pause.remove(id.seq),
            C::SimRunning => self.sim_running.remove(id.seq),
            C::Crashed => self.crashed.remove(id.seq),
            C::Sound => self.sound.remove(id.seq),
            C::View => self.view.remove(id.seq),
            C::CustomEvent => self.custom_event.remove(id.seq),
        }
    }
}
