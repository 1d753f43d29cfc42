//! Connection lifecycle task
//!
//! One task owns the message source. It connects with retry, reads the
//! session until the stream ends, tears the session down and, when
//! reconnecting is enabled, starts over after the reconnect delay:
//!
//! ```text
//! Disconnected ─► Connecting ─► Connected ─► Available
//!      ▲              ▲ │ retry                  │ stream closed
//!      │              └─┘                        ▼
//!      │                                   Disconnected
//!      │                                         │ auto_reconnect
//!      └──── cancelled ────────────────── Reconnecting
//! ```
//!
//! Cancelling the client's root token stops the loop at any await point and
//! leaves the state at `Disconnected`.

use std::sync::Arc;
use std::time::Duration;

use simlink_transport_traits::{MessageSource, OpenInfo, SourceError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::dispatcher::{Dispatcher, Outcome};
use super::shared::Shared;
use crate::correlation::RequestKind;
use crate::error::{ClientError, Result};
use crate::ids::{InternalEvent, STATE_DEFINITION_ID, STATE_REQUEST_ID};
use crate::metrics::ClientMetrics;
use crate::state::{ConnectionState, SIM_STATE_FIELDS};

/// How a session ended.
enum SessionEnd {
    /// The stream closed or the simulator quit.
    Closed,
    /// The client is shutting down.
    Cancelled,
}

pub(crate) struct Lifecycle<S: ?Sized> {
    dispatcher: Dispatcher,
    source: Arc<S>,
    root: CancellationToken,
}

impl<S: MessageSource + ?Sized> Lifecycle<S> {
    pub(crate) fn new(shared: Arc<Shared>, source: Arc<S>) -> Self {
        let root = shared.root.clone();
        Self {
            dispatcher: Dispatcher::new(shared),
            source,
            root,
        }
    }

    fn shared(&self) -> Arc<Shared> {
        Arc::clone(self.dispatcher.shared())
    }

    /// Runs connect, session and reconnect cycles until cancelled or failed.
    ///
    /// A fatal error is stored as the client's last error before the final
    /// `Disconnected` transition is reported.
    pub(crate) async fn run(mut self) {
        if let Err(error) = self.run_cycles().await {
            error!(error = %error, "Connection lifecycle stopped");
            self.dispatcher.shared().set_last_error(error);
        }
        self.dispatcher.transition(ConnectionState::Disconnected, 0);
        debug!("Connection lifecycle finished");
    }

    async fn run_cycles(&mut self) -> Result<()> {
        let shared = self.shared();
        loop {
            if !self.connect_with_retry().await? {
                return Ok(());
            }

            let end = self.run_session().await;
            self.end_session().await;

            if matches!(end, SessionEnd::Cancelled) || self.root.is_cancelled() {
                return Ok(());
            }
            if !shared.config.auto_reconnect {
                info!("Stream closed and reconnecting is disabled");
                return Err(ClientError::StreamTerminated);
            }

            self.dispatcher.transition(ConnectionState::Reconnecting, 0);
            ClientMetrics::incr(&shared.metrics.reconnects);
            if !self.pause(shared.config.reconnect_delay()).await {
                return Ok(());
            }
        }
    }

    /// Connects, retrying per configuration. Returns `false` if cancelled.
    async fn connect_with_retry(&mut self) -> Result<bool> {
        let shared = self.shared();
        let config = &shared.config;
        let timeout = config.connection_timeout();
        let mut failures = 0u32;

        for attempt in 1u32.. {
            self.dispatcher
                .transition(ConnectionState::Connecting, attempt);
            ClientMetrics::incr(&shared.metrics.connect_attempts);

            let result = tokio::select! {
                biased;
                () = self.root.cancelled() => return Ok(false),
                result = tokio::time::timeout(timeout, self.source.connect(&config.client_name)) => {
                    result.unwrap_or(Err(SourceError::ConnectionTimeout { timeout }))
                }
            };

            match result {
                Ok(()) => {
                    info!(attempt, client_name = %config.client_name, "Connected to simulator");
                    self.dispatcher
                        .transition(ConnectionState::Connected, attempt);
                    return Ok(true);
                }
                Err(error) => {
                    ClientMetrics::incr(&shared.metrics.connect_failures);
                    failures += 1;
                    warn!(attempt, error = %error, "Connect attempt failed");

                    if config.max_retries != 0 && failures > config.max_retries {
                        return Err(ClientError::ConnectionFailed {
                            attempts: attempt,
                            source: error,
                        });
                    }
                    if !self.pause(config.retry_interval()).await {
                        return Ok(false);
                    }
                }
            }
        }
        Ok(false)
    }

    /// Sleeps for `delay`. Returns `false` if cancelled first.
    async fn pause(&self, delay: Duration) -> bool {
        tokio::select! {
            biased;
            () = self.root.cancelled() => false,
            () = tokio::time::sleep(delay) => true,
        }
    }

    async fn run_session(&mut self) -> SessionEnd {
        let mut registered = false;
        loop {
            let envelope = tokio::select! {
                biased;
                () = self.root.cancelled() => return SessionEnd::Cancelled,
                envelope = self.source.next_message() => envelope,
            };

            let Some(envelope) = envelope else {
                info!("Simulator closed the message stream");
                return SessionEnd::Closed;
            };

            match self.dispatcher.dispatch(envelope) {
                Outcome::Continue => {}
                Outcome::Ready(info) => {
                    if !registered {
                        registered = true;
                        self.register_session(&info).await;
                    }
                }
                Outcome::Terminated => {
                    info!("Simulator is quitting");
                    return SessionEnd::Closed;
                }
            }
        }
    }

    /// Registers the internal events, the allocated custom events and the
    /// polled state definition. Handles are per session, so this runs again
    /// after every reconnect.
    async fn register_session(&self, info: &OpenInfo) {
        let shared = self.shared();
        let source = &self.source;
        debug!(
            application = %info.application_name,
            version = ?info.application_version,
            "Registering session"
        );

        for event in InternalEvent::ALL {
            if let Err(error) = source
                .subscribe_to_system_event(event.id(), event.system_event_name())
                .await
            {
                warn!(event = event.system_event_name(), error = %error, "Internal event subscription failed");
            }
        }

        for (id, name) in shared.custom_events.allocations() {
            match source.subscribe_to_system_event(id, &name).await {
                Ok(()) => {
                    shared
                        .requests
                        .register(RequestKind::SystemEvent, id, &*name);
                }
                Err(error) => {
                    warn!(id, name = %name, error = %error, "Custom event subscription failed");
                }
            }
        }

        if let Err(error) = self.register_state_definition().await {
            warn!(error = %error, "Polled state registration failed");
        }
    }

    async fn register_state_definition(&self) -> std::result::Result<(), SourceError> {
        let source = &self.source;
        source.clear_data_definition(STATE_DEFINITION_ID).await?;
        for (name, units, data_type) in SIM_STATE_FIELDS {
            source
                .add_to_data_definition(STATE_DEFINITION_ID, name, units, *data_type)
                .await?;
        }
        let period = self.dispatcher.shared().config.poll_period;
        source
            .request_data_on_sim_object(STATE_REQUEST_ID, STATE_DEFINITION_ID, 0, period)
            .await
    }

    async fn end_session(&mut self) {
        if let Err(error) = self.source.disconnect().await {
            warn!(error = %error, "Disconnect failed");
        }
        self.dispatcher.clear_session();
        self.dispatcher.transition(ConnectionState::Disconnected, 0);
    }
}
