//! State shared between the lifecycle task and caller tasks
//!
//! Everything here is independent of the message source type, so the
//! dispatcher and registries are compiled once no matter which source a
//! client is built over.

use std::sync::Arc;
use std::sync::atomic::AtomicU64;

use parking_lot::{Mutex, RwLock};
use simlink_transport_traits::Envelope;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::config::ClientConfig;
use crate::correlation::RequestRegistry;
use crate::custom_events::CustomEventAllocator;
use crate::error::ClientError;
use crate::handlers::HandlerRegistry;
use crate::metrics::ClientMetrics;
use crate::state::{ConnectionState, ConnectionStateChange, SimState, SimStateChange};
use crate::subscriptions::{Entry, ShutdownTracker, SubscriptionRegistry};

/// Reusable snapshot buffers, one per subscription registry.
///
/// Owned by whoever fans items out, so a dispatch pass allocates nothing once
/// the buffers have grown to the number of open subscriptions.
#[derive(Default)]
pub(crate) struct Scratch {
    pub(crate) messages: Vec<Arc<Entry<Arc<Envelope>>>>,
    pub(crate) connection: Vec<Arc<Entry<ConnectionStateChange>>>,
    pub(crate) sim: Vec<Arc<Entry<SimStateChange>>>,
}

/// Per-client state
#[derive(Debug)]
pub(crate) struct Shared {
    pub(crate) config: ClientConfig,
    /// Current connection state; the watch channel lets callers await a state
    pub(crate) connection_state: watch::Sender<ConnectionState>,
    pub(crate) sim_state: RwLock<SimState>,
    pub(crate) handlers: HandlerRegistry,
    pub(crate) messages: SubscriptionRegistry<Arc<Envelope>>,
    pub(crate) connection_events: SubscriptionRegistry<ConnectionStateChange>,
    pub(crate) sim_events: SubscriptionRegistry<SimStateChange>,
    pub(crate) requests: RequestRegistry,
    pub(crate) custom_events: CustomEventAllocator,
    pub(crate) metrics: Arc<ClientMetrics>,
    pub(crate) tracker: Arc<ShutdownTracker>,
    pub(crate) root: CancellationToken,
    pub(crate) last_error: Mutex<Option<Arc<ClientError>>>,
}

impl Shared {
    pub(crate) fn new(config: ClientConfig, custom_events: CustomEventAllocator) -> Self {
        let metrics = Arc::new(ClientMetrics::new());
        let tracker = Arc::new(ShutdownTracker::default());
        let root = CancellationToken::new();
        let next_id = Arc::new(AtomicU64::new(1));
        let capacity = config.buffer_size;

        let messages = SubscriptionRegistry::new(
            "messages",
            capacity,
            Arc::clone(&next_id),
            Arc::clone(&tracker),
            Arc::clone(&metrics),
            root.clone(),
        );
        let connection_events = SubscriptionRegistry::new(
            "connection_state",
            capacity,
            Arc::clone(&next_id),
            Arc::clone(&tracker),
            Arc::clone(&metrics),
            root.clone(),
        );
        let sim_events = SubscriptionRegistry::new(
            "sim_state",
            capacity,
            next_id,
            Arc::clone(&tracker),
            Arc::clone(&metrics),
            root.clone(),
        );

        Self {
            config,
            connection_state: watch::Sender::new(ConnectionState::Disconnected),
            sim_state: RwLock::new(SimState::default()),
            handlers: HandlerRegistry::default(),
            messages,
            connection_events,
            sim_events,
            requests: RequestRegistry::new(),
            custom_events,
            metrics,
            tracker,
            root,
            last_error: Mutex::new(None),
        }
    }

    pub(crate) fn connection_state(&self) -> ConnectionState {
        *self.connection_state.borrow()
    }

    /// Moves to `next` and notifies handlers and subscriptions.
    ///
    /// A transition to the current state is only reported when the attempt
    /// number changes, so every connect attempt shows up as its own
    /// `Connecting` event.
    pub(crate) fn transition(&self, next: ConnectionState, attempt: u32, scratch: &mut Scratch) {
        let mut previous = next;
        let changed = self.connection_state.send_if_modified(|state| {
            previous = *state;
            *state = next;
            previous != next || attempt != 0
        });
        if !changed {
            return;
        }

        info!(from = %previous, to = %next, attempt, "Connection state changed");
        let change = ConnectionStateChange {
            previous,
            current: next,
            attempt,
        };
        self.handlers
            .connection_state
            .invoke(&self.metrics, |handler| handler(change));
        self.connection_events.publish(&change, &mut scratch.connection);
    }

    /// Applies `update` to the simulator state and returns the change if it
    /// is significant.
    pub(crate) fn update_sim_state(
        &self,
        update: impl FnOnce(&SimState) -> SimState,
    ) -> Option<SimStateChange> {
        let mut guard = self.sim_state.write();
        let previous = *guard;
        let current = update(&previous);
        *guard = current;
        drop(guard);

        (!previous.significant_eq(&current)).then_some(SimStateChange { previous, current })
    }

    /// Reports a significant simulator state change.
    pub(crate) fn notify_sim_state(&self, change: &SimStateChange, scratch: &mut Scratch) {
        self.handlers
            .sim_state
            .invoke(&self.metrics, |handler| handler(change));
        self.sim_events.publish(change, &mut scratch.sim);
    }

    /// Resets the simulator state to defaults, reporting the change if any.
    pub(crate) fn reset_sim_state(&self, scratch: &mut Scratch) {
        if let Some(change) = self.update_sim_state(|_| SimState::default()) {
            self.notify_sim_state(&change, scratch);
        }
    }

    /// Drops every per-session registration.
    pub(crate) fn clear_session(&self, scratch: &mut Scratch) {
        self.requests.clear();
        self.reset_sim_state(scratch);
    }

    pub(crate) fn set_last_error(&self, error: ClientError) {
        *self.last_error.lock() = Some(Arc::new(error));
    }

    /// Closes every open subscription. Returns how many were still open.
    pub(crate) fn close_all_subscriptions(&self) -> usize {
        self.messages.close_all() + self.connection_events.close_all() + self.sim_events.close_all()
    }
}
