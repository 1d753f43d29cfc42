//! Envelope dispatch
//!
//! The dispatcher runs on the lifecycle task and is the only consumer of the
//! message source, so envelopes are handled strictly in arrival order. For
//! each envelope it:
//!
//! 1. Skips envelopes carrying a stream error (logged and counted).
//! 2. Classifies by kind and updates connection and simulator state.
//! 3. Invokes the handlers registered for that kind of event.
//! 4. Forwards the envelope to every message handler and every message
//!    subscription whose filter accepts it.
//!
//! ```text
//! ┌────────────────────────────────────────────────┐
//! │                 Dispatcher                     │
//! │                                                │
//! │  envelope ──► classify ──► state update        │
//! │                   │            │               │
//! │                   ▼            ▼               │
//! │            kind handlers   sim state change    │
//! │                   │                            │
//! │                   ▼                            │
//! │       message handlers + subscriptions         │
//! └────────────────────────────────────────────────┘
//! ```
//!
//! Handlers and deliveries never block the dispatcher: handlers run with
//! panic isolation and subscriptions are fed with non-blocking sends.

use std::sync::Arc;
use std::time::Instant;

use simlink_transport_traits::{Envelope, MessageKind, OpenInfo, Payload};
use tracing::{debug, trace, warn};

use super::shared::{Scratch, Shared};
use crate::correlation::RequestKind;
use crate::custom_events::CustomEvent;
use crate::ids::{InternalEvent, STATE_DEFINITION_ID, STATE_REQUEST_ID};
use crate::metrics::ClientMetrics;
use crate::state::{ConnectionState, PolledState, SimState};

/// What the lifecycle should do after an envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Outcome {
    /// Keep reading.
    Continue,
    /// The simulator signalled ready; per-session registration is due.
    Ready(OpenInfo),
    /// The simulator is quitting; the session is over.
    Terminated,
}

pub(crate) struct Dispatcher {
    shared: Arc<Shared>,
    scratch: Scratch,
}

impl Dispatcher {
    pub(crate) fn new(shared: Arc<Shared>) -> Self {
        Self {
            shared,
            scratch: Scratch::default(),
        }
    }

    pub(crate) fn shared(&self) -> &Arc<Shared> {
        &self.shared
    }

    /// Connection state transition with notification.
    pub(crate) fn transition(&mut self, next: ConnectionState, attempt: u32) {
        self.shared.transition(next, attempt, &mut self.scratch);
    }

    /// Drops the per-session registrations.
    pub(crate) fn clear_session(&mut self) {
        self.shared.clear_session(&mut self.scratch);
    }

    /// Runs one full dispatch pass.
    pub(crate) fn dispatch(&mut self, envelope: Envelope) -> Outcome {
        let metrics = Arc::clone(&self.shared.metrics);
        ClientMetrics::incr(&metrics.envelopes_received);

        if let Some(error) = &envelope.error {
            ClientMetrics::incr(&metrics.envelopes_errored);
            warn!(kind = %envelope.kind, error = %error, "Stream reported an error");
            return Outcome::Continue;
        }

        let started = Instant::now();
        trace!(kind = %envelope.kind, request_id = envelope.request_id, "Dispatching envelope");

        let outcome = self.classify(&envelope);
        self.forward(envelope);

        ClientMetrics::incr(&metrics.envelopes_dispatched);
        metrics.record_dispatch_us(started.elapsed().as_micros() as u64);
        outcome
    }

    fn classify(&mut self, envelope: &Envelope) -> Outcome {
        match (&envelope.kind, &envelope.payload) {
            (MessageKind::Open, payload) => {
                let info = match payload {
                    Payload::Open(info) => info.clone(),
                    _ => OpenInfo::default(),
                };
                self.on_open(&info);
                Outcome::Ready(info)
            }
            (MessageKind::Quit, _) => {
                self.on_quit();
                Outcome::Terminated
            }
            (MessageKind::Event, Payload::Event(event)) => {
                self.on_event(event.event_id, event.data);
                Outcome::Continue
            }
            (MessageKind::EventFilename, Payload::Filename(event)) => {
                self.on_filename(event.event_id, &event.filename);
                Outcome::Continue
            }
            (MessageKind::EventObjectAddRemove, Payload::ObjectAddRemove(event)) => {
                let handlers = &self.shared.handlers;
                let list = match InternalEvent::from_id(event.event_id) {
                    Some(InternalEvent::ObjectAdded) => &handlers.object_added,
                    Some(InternalEvent::ObjectRemoved) => &handlers.object_removed,
                    _ => return Outcome::Continue,
                };
                list.invoke(&self.shared.metrics, |handler| handler(event));
                Outcome::Continue
            }
            (MessageKind::SimObjectData, Payload::SimObjectData(data)) => {
                if data.request_id == STATE_REQUEST_ID && data.define_id == STATE_DEFINITION_ID {
                    self.on_state_poll(&data.data);
                } else if self
                    .shared
                    .requests
                    .record_response(RequestKind::DataRequest, data.request_id)
                    .is_none()
                {
                    debug!(request_id = data.request_id, "Data for an unregistered request");
                }
                Outcome::Continue
            }
            (MessageKind::Exception, Payload::Exception(info)) => {
                warn!(
                    exception = info.exception,
                    send_id = info.send_id,
                    index = info.index,
                    "Simulator rejected a request"
                );
                Outcome::Continue
            }
            _ => Outcome::Continue,
        }
    }

    fn on_open(&mut self, info: &OpenInfo) {
        if self.shared.connection_state() != ConnectionState::Available {
            ClientMetrics::incr(&self.shared.metrics.sessions_opened);
        }
        self.shared.reset_sim_state(&mut self.scratch);
        self.transition(ConnectionState::Available, 0);
        self.shared
            .handlers
            .open
            .invoke(&self.shared.metrics, |handler| handler(info));
    }

    fn on_quit(&mut self) {
        self.shared
            .handlers
            .quit
            .invoke(&self.shared.metrics, |handler| handler());
        self.shared.reset_sim_state(&mut self.scratch);
    }

    fn on_event(&mut self, event_id: u32, data: u32) {
        if let Some(event) = InternalEvent::from_id(event_id) {
            self.on_internal_event(event, data);
            return;
        }

        let allocator = &self.shared.custom_events;
        if allocator.in_range(event_id)
            && let Some(name) = allocator.name_of(event_id)
        {
            let event = CustomEvent {
                id: event_id,
                name,
                data,
            };
            self.shared
                .handlers
                .custom_event
                .invoke(&self.shared.metrics, |handler| handler(&event));
        }
    }

    fn on_internal_event(&mut self, event: InternalEvent, data: u32) {
        let mut flags_changed = false;
        let change = self.shared.update_sim_state(|state| {
            let mut next = *state;
            flags_changed = next.events.apply(event, data);
            next
        });
        if !flags_changed {
            return;
        }

        let shared = &self.shared;
        let events = shared.sim_state.read().events;
        let handlers = &shared.handlers;
        match event {
            InternalEvent::Pause => handlers
                .pause
                .invoke(&shared.metrics, |handler| handler(events.paused)),
            InternalEvent::Sim => handlers
                .sim_running
                .invoke(&shared.metrics, |handler| handler(events.sim_running)),
            InternalEvent::Crashed | InternalEvent::CrashReset => handlers
                .crashed
                .invoke(&shared.metrics, |handler| handler(events.crashed)),
            InternalEvent::Sound => handlers
                .sound
                .invoke(&shared.metrics, |handler| handler(events.sound)),
            InternalEvent::View => handlers
                .view
                .invoke(&shared.metrics, |handler| handler(events.view)),
            _ => {}
        }

        if let Some(change) = change {
            self.shared.notify_sim_state(&change, &mut self.scratch);
        }
    }

    fn on_filename(&self, event_id: u32, filename: &str) {
        let handlers = &self.shared.handlers;
        let list = match InternalEvent::from_id(event_id) {
            Some(InternalEvent::FlightLoaded) => &handlers.flight_loaded,
            Some(InternalEvent::AircraftLoaded) => &handlers.aircraft_loaded,
            Some(InternalEvent::FlightPlanActivated) => &handlers.flight_plan_activated,
            _ => return,
        };
        list.invoke(&self.shared.metrics, |handler| handler(filename));
    }

    fn on_state_poll(&mut self, data: &[u8]) {
        let polled = match PolledState::decode(data) {
            Ok(polled) => polled,
            Err(error) => {
                ClientMetrics::incr(&self.shared.metrics.decode_failures);
                warn!(error = %error, "Failed to decode polled state");
                return;
            }
        };

        let change = self
            .shared
            .update_sim_state(|state: &SimState| state.with_polled(polled));
        if let Some(change) = change {
            self.shared.notify_sim_state(&change, &mut self.scratch);
        }
    }

    fn forward(&mut self, envelope: Envelope) {
        let shared = &self.shared;
        shared
            .handlers
            .message
            .invoke(&shared.metrics, |handler| handler(&envelope));

        // One shared allocation per envelope, released when the last
        // subscriber drops its copy
        let envelope = Arc::new(envelope);
        shared
            .messages
            .publish(&envelope, &mut self.scratch.messages);
    }
}
