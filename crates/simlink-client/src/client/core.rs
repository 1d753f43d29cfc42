//! Core client implementation
//!
//! [`SimClient`] wraps a [`MessageSource`] and turns its single ordered stream
//! into a reconnecting event bus with handlers, filtered subscriptions, a
//! simulator state model and request correlation.
//!
//! The client is cheaply cloneable: every clone shares the same lifecycle
//! task, registries and state.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::json;
use simlink_transport_traits::{DataPeriod, DataType, Envelope, MessageKind, MessageSource};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::config::ClientConfig;
use super::lifecycle::Lifecycle;
use super::shared::{Scratch, Shared};
use crate::correlation::{RequestKind, RequestRegistry};
use crate::custom_events::{CustomEvent, CustomEventAllocator};
use crate::error::{ClientError, Result};
use crate::handlers::{
    ConnectionStateHandler, CustomEventHandler, FilenameHandler, FlagHandler, HandlerId,
    HandlerRegistry, MessageHandler, ObjectHandler, OpenHandler, QuitHandler, SimStateHandler,
    ValueHandler,
};
use crate::ids::validate_user_id;
use crate::metrics::MetricsSnapshot;
use crate::state::{ConnectionState, ConnectionStateChange, SimState, SimStateChange};
use crate::subscriptions::{Filter, Predicate, Subscription, SubscriptionOptions};

/// Inner client state shared by every clone
struct ClientInner<S: MessageSource + 'static> {
    shared: Arc<Shared>,
    source: Arc<S>,
    task: Mutex<Option<JoinHandle<()>>>,
    started: AtomicBool,
}

impl<S: MessageSource + 'static> Drop for ClientInner<S> {
    fn drop(&mut self) {
        // Stops the lifecycle task and subscription watchers once the last
        // clone is gone
        self.shared.root.cancel();
    }
}

/// Reconnecting client over a simulator message stream.
///
/// ```rust,no_run
/// use simlink_client::{ClientConfig, SimClient, SubscriptionOptions};
/// use simlink_transport_traits::ChannelSource;
///
/// # async fn example() -> simlink_client::Result<()> {
/// let (source, _feed) = ChannelSource::new();
/// let client = SimClient::new(source, ClientConfig::default())?;
///
/// client.on_pause(|paused| println!("paused: {paused}"));
/// let mut events = client.subscribe(SubscriptionOptions::new().named("log"))?;
///
/// client.start()?;
/// while let Some(envelope) = events.recv().await {
///     println!("{:?}", envelope.kind);
/// }
/// client.shutdown().await?;
/// # Ok(())
/// # }
/// ```
pub struct SimClient<S: MessageSource + 'static> {
    inner: Arc<ClientInner<S>>,
}

impl<S: MessageSource + 'static> Clone for SimClient<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S: MessageSource + 'static> std::fmt::Debug for SimClient<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimClient")
            .field("client_name", &self.inner.shared.config.client_name)
            .field("state", &self.connection_state())
            .field("source", &self.inner.source)
            .finish()
    }
}

impl<S: MessageSource + 'static> SimClient<S> {
    /// Creates a client over `source`.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Config`] if `config` fails validation.
    pub fn new(source: S, config: ClientConfig) -> Result<Self> {
        Self::with_allocator(source, config, CustomEventAllocator::new())
    }

    pub(crate) fn with_allocator(
        source: S,
        config: ClientConfig,
        custom_events: CustomEventAllocator,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            inner: Arc::new(ClientInner {
                shared: Arc::new(Shared::new(config, custom_events)),
                source: Arc::new(source),
                task: Mutex::new(None),
                started: AtomicBool::new(false),
            }),
        })
    }

    fn shared(&self) -> &Shared {
        &self.inner.shared
    }

    fn handlers(&self) -> &HandlerRegistry {
        &self.inner.shared.handlers
    }

    // ============================================================================
    // Lifecycle
    // ============================================================================

    /// Spawns the connection lifecycle task on the current Tokio runtime.
    ///
    /// # Errors
    ///
    /// - [`ClientError::AlreadyStarted`] on a second call
    /// - [`ClientError::ShuttingDown`] after [`shutdown`](Self::shutdown)
    /// - [`ClientError::Io`] when called outside a Tokio runtime
    pub fn start(&self) -> Result<()> {
        let shared = &self.inner.shared;
        if shared.root.is_cancelled() {
            return Err(ClientError::ShuttingDown);
        }

        let handle = tokio::runtime::Handle::try_current()
            .map_err(|e| ClientError::Io(std::io::Error::other(e.to_string())))?;

        if self.inner.started.swap(true, Ordering::SeqCst) {
            return Err(ClientError::AlreadyStarted);
        }

        let lifecycle = Lifecycle::new(Arc::clone(shared), Arc::clone(&self.inner.source));
        let task = handle.spawn(lifecycle.run());
        *self.inner.task.lock() = Some(task);

        info!(client_name = %shared.config.client_name, "Client started");
        Ok(())
    }

    /// Shuts the client down.
    ///
    /// Stops connection attempts, waits up to `shutdown_timeout` for open
    /// subscriptions to close, then force-closes the rest, disconnects and
    /// clears every per-session registry. Calling it again is a no-op apart
    /// from the final disconnect.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Source`] if the final disconnect fails. The
    /// client is shut down regardless.
    pub async fn shutdown(&self) -> Result<()> {
        let shared = &self.inner.shared;
        if !shared.root.is_cancelled() {
            info!(client_name = %shared.config.client_name, "Shutting down client");
        }
        shared.root.cancel();

        let timeout = shared.config.shutdown_timeout();
        if !shared.tracker.wait_idle(timeout).await {
            warn!(
                open = shared.tracker.active(),
                "Subscriptions still open after shutdown timeout"
            );
        }
        let forced = shared.close_all_subscriptions();
        if forced > 0 {
            debug!(forced, "Closed remaining subscriptions");
        }

        let task = self.inner.task.lock().take();
        if let Some(mut task) = task
            && tokio::time::timeout(timeout, &mut task).await.is_err()
        {
            warn!("Lifecycle task did not stop in time, aborting");
            task.abort();
        }

        let disconnected = self.inner.source.disconnect().await;

        let mut scratch = Scratch::default();
        shared.clear_session(&mut scratch);
        shared.transition(ConnectionState::Disconnected, 0, &mut scratch);

        disconnected.map_err(ClientError::from)
    }

    /// Waits until the connection reaches `state`.
    ///
    /// Returns `false` if `timeout` elapses first. States that are left again
    /// before this task observes them may be missed; `Available` and
    /// `Disconnected` are the reliable targets.
    pub async fn wait_for_state(&self, state: ConnectionState, timeout: Duration) -> bool {
        let mut rx = self.shared().connection_state.subscribe();
        matches!(
            tokio::time::timeout(timeout, rx.wait_for(|current| *current == state)).await,
            Ok(Ok(_))
        )
    }

    /// Current connection state.
    pub fn connection_state(&self) -> ConnectionState {
        self.shared().connection_state()
    }

    /// Latest simulator state snapshot.
    pub fn sim_state(&self) -> SimState {
        *self.shared().sim_state.read()
    }

    /// Returns `true` once the simulator has signalled ready.
    pub fn is_available(&self) -> bool {
        self.connection_state() == ConnectionState::Available
    }

    /// Counter snapshot.
    pub fn metrics(&self) -> MetricsSnapshot {
        self.shared().metrics.snapshot()
    }

    /// The error that stopped the lifecycle task, if any.
    pub fn last_error(&self) -> Option<Arc<ClientError>> {
        self.shared().last_error.lock().clone()
    }

    /// Active configuration.
    pub fn config(&self) -> &ClientConfig {
        &self.shared().config
    }

    // ============================================================================
    // Handlers
    // ============================================================================

    /// Runs `handler` on every connection state transition.
    pub fn on_connection_state<F>(&self, handler: F) -> HandlerId
    where
        F: Fn(ConnectionStateChange) + Send + Sync + 'static,
    {
        let handler: Arc<ConnectionStateHandler> = Arc::new(handler);
        self.handlers()
            .register(&self.handlers().connection_state, handler)
    }

    /// Runs `handler` on every significant simulator state change.
    pub fn on_sim_state<F>(&self, handler: F) -> HandlerId
    where
        F: Fn(&SimStateChange) + Send + Sync + 'static,
    {
        let handler: Arc<SimStateHandler> = Arc::new(handler);
        self.handlers().register(&self.handlers().sim_state, handler)
    }

    /// Runs `handler` on every envelope.
    pub fn on_message<F>(&self, handler: F) -> HandlerId
    where
        F: Fn(&Envelope) + Send + Sync + 'static,
    {
        let handler: Arc<MessageHandler> = Arc::new(handler);
        self.handlers().register(&self.handlers().message, handler)
    }

    /// Runs `handler` when the simulator signals ready.
    pub fn on_open<F>(&self, handler: F) -> HandlerId
    where
        F: Fn(&simlink_transport_traits::OpenInfo) + Send + Sync + 'static,
    {
        let handler: Arc<OpenHandler> = Arc::new(handler);
        self.handlers().register(&self.handlers().open, handler)
    }

    /// Runs `handler` when the simulator quits.
    pub fn on_quit<F>(&self, handler: F) -> HandlerId
    where
        F: Fn() + Send + Sync + 'static,
    {
        let handler: Arc<QuitHandler> = Arc::new(handler);
        self.handlers().register(&self.handlers().quit, handler)
    }

    /// Runs `handler` with the file name of every loaded flight.
    pub fn on_flight_loaded<F>(&self, handler: F) -> HandlerId
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        let handler: Arc<FilenameHandler> = Arc::new(handler);
        self.handlers().register(&self.handlers().flight_loaded, handler)
    }

    /// Runs `handler` with the file name of every loaded aircraft.
    pub fn on_aircraft_loaded<F>(&self, handler: F) -> HandlerId
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        let handler: Arc<FilenameHandler> = Arc::new(handler);
        self.handlers()
            .register(&self.handlers().aircraft_loaded, handler)
    }

    /// Runs `handler` with the file name of every activated flight plan.
    pub fn on_flight_plan_activated<F>(&self, handler: F) -> HandlerId
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        let handler: Arc<FilenameHandler> = Arc::new(handler);
        self.handlers()
            .register(&self.handlers().flight_plan_activated, handler)
    }

    /// Runs `handler` for every object added to the simulation.
    pub fn on_object_added<F>(&self, handler: F) -> HandlerId
    where
        F: Fn(&simlink_transport_traits::ObjectEvent) + Send + Sync + 'static,
    {
        let handler: Arc<ObjectHandler> = Arc::new(handler);
        self.handlers().register(&self.handlers().object_added, handler)
    }

    /// Runs `handler` for every object removed from the simulation.
    pub fn on_object_removed<F>(&self, handler: F) -> HandlerId
    where
        F: Fn(&simlink_transport_traits::ObjectEvent) + Send + Sync + 'static,
    {
        let handler: Arc<ObjectHandler> = Arc::new(handler);
        self.handlers()
            .register(&self.handlers().object_removed, handler)
    }

    /// Runs `handler` when the pause flag changes.
    pub fn on_pause<F>(&self, handler: F) -> HandlerId
    where
        F: Fn(bool) + Send + Sync + 'static,
    {
        let handler: Arc<FlagHandler> = Arc::new(handler);
        self.handlers().register(&self.handlers().pause, handler)
    }

    /// Runs `handler` when the simulation starts or stops running.
    pub fn on_sim_running<F>(&self, handler: F) -> HandlerId
    where
        F: Fn(bool) + Send + Sync + 'static,
    {
        let handler: Arc<FlagHandler> = Arc::new(handler);
        self.handlers().register(&self.handlers().sim_running, handler)
    }

    /// Runs `handler` when the crashed flag changes.
    pub fn on_crashed<F>(&self, handler: F) -> HandlerId
    where
        F: Fn(bool) + Send + Sync + 'static,
    {
        let handler: Arc<FlagHandler> = Arc::new(handler);
        self.handlers().register(&self.handlers().crashed, handler)
    }

    /// Runs `handler` when the sound state changes.
    pub fn on_sound<F>(&self, handler: F) -> HandlerId
    where
        F: Fn(u32) + Send + Sync + 'static,
    {
        let handler: Arc<ValueHandler> = Arc::new(handler);
        self.handlers().register(&self.handlers().sound, handler)
    }

    /// Runs `handler` when the view changes.
    pub fn on_view<F>(&self, handler: F) -> HandlerId
    where
        F: Fn(u32) + Send + Sync + 'static,
    {
        let handler: Arc<ValueHandler> = Arc::new(handler);
        self.handlers().register(&self.handlers().view, handler)
    }

    /// Runs `handler` for every fired custom event.
    pub fn on_custom_event<F>(&self, handler: F) -> HandlerId
    where
        F: Fn(&CustomEvent) + Send + Sync + 'static,
    {
        let handler: Arc<CustomEventHandler> = Arc::new(handler);
        self.handlers().register(&self.handlers().custom_event, handler)
    }

    /// Removes a handler. Returns `false` if it was already removed.
    pub fn remove_handler(&self, id: HandlerId) -> bool {
        self.handlers().remove(id)
    }

    // ============================================================================
    // Subscriptions
    // ============================================================================

    /// Opens a subscription receiving every envelope.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::ShuttingDown`] once shutdown has begun.
    pub fn subscribe(&self, options: SubscriptionOptions) -> Result<Subscription<Arc<Envelope>>> {
        self.shared().messages.subscribe(options, Filter::All)
    }

    /// Opens a subscription receiving the envelopes `predicate` accepts.
    ///
    /// A panicking predicate rejects the envelope.
    pub fn subscribe_filtered<F>(
        &self,
        options: SubscriptionOptions,
        predicate: F,
    ) -> Result<Subscription<Arc<Envelope>>>
    where
        F: Fn(&Envelope) -> bool + Send + Sync + 'static,
    {
        let predicate: Predicate<Arc<Envelope>> =
            Arc::new(move |envelope: &Arc<Envelope>| predicate(envelope.as_ref()));
        self.shared()
            .messages
            .subscribe(options, Filter::Predicate(predicate))
    }

    /// Opens a subscription receiving only envelopes of the given kinds.
    pub fn subscribe_kinds(
        &self,
        options: SubscriptionOptions,
        kinds: impl IntoIterator<Item = MessageKind>,
    ) -> Result<Subscription<Arc<Envelope>>> {
        let filter: Filter<Arc<Envelope>> = Filter::AllowSet {
            kinds: kinds.into_iter().collect::<HashSet<_>>(),
            classify: envelope_kind,
        };
        self.shared().messages.subscribe(options, filter)
    }

    /// Opens a subscription receiving connection state transitions.
    pub fn subscribe_connection_state(
        &self,
        options: SubscriptionOptions,
    ) -> Result<Subscription<ConnectionStateChange>> {
        self.shared()
            .connection_events
            .subscribe(options, Filter::All)
    }

    /// Opens a subscription receiving significant simulator state changes.
    pub fn subscribe_sim_state(
        &self,
        options: SubscriptionOptions,
    ) -> Result<Subscription<SimStateChange>> {
        self.shared().sim_events.subscribe(options, Filter::All)
    }

    /// Allocates the custom event `name` and opens a subscription receiving
    /// its envelopes.
    ///
    /// # Errors
    ///
    /// Fails like [`allocate_custom_event`](Self::allocate_custom_event) or
    /// [`subscribe`](Self::subscribe).
    pub async fn subscribe_custom_event(
        &self,
        name: &str,
        options: SubscriptionOptions,
    ) -> Result<Subscription<Arc<Envelope>>> {
        let id = self.allocate_custom_event(name).await?;
        self.subscribe_filtered(options, move |envelope| {
            envelope.kind == MessageKind::Event && envelope.event_id() == Some(id)
        })
    }

    // ============================================================================
    // Requests
    // ============================================================================

    /// Outstanding request registry.
    pub fn requests(&self) -> &RequestRegistry {
        &self.shared().requests
    }

    /// Custom event allocations.
    pub fn custom_events(&self) -> &CustomEventAllocator {
        &self.shared().custom_events
    }

    fn ensure_session(&self) -> Result<()> {
        if self.connection_state().has_session() {
            Ok(())
        } else {
            Err(ClientError::NotConnected)
        }
    }

    /// Allocates an id for the custom event `name`.
    ///
    /// Allocating a known name returns its id. A new name is subscribed right
    /// away if the simulator is available, and on every later session
    /// otherwise.
    ///
    /// # Errors
    ///
    /// - [`ClientError::ReservedName`] for built-in event names
    /// - [`ClientError::EventIdsExhausted`] once the range is used up
    pub async fn allocate_custom_event(&self, name: &str) -> Result<u32> {
        let allocator = &self.shared().custom_events;
        let known = allocator.lookup(name).is_some();
        let id = allocator.allocate(name)?;

        if !known && self.is_available() {
            match self.inner.source.subscribe_to_system_event(id, name).await {
                Ok(()) => {
                    self.requests().register(RequestKind::SystemEvent, id, name);
                }
                Err(error) => {
                    // Retried with the next session's registration
                    warn!(id, name, error = %error, "Custom event subscription failed");
                }
            }
        }
        Ok(id)
    }

    /// Subscribes to the system event `name` under `event_id`.
    ///
    /// # Errors
    ///
    /// - [`ClientError::ReservedId`] for ids outside the user range
    /// - [`ClientError::NotConnected`] without a session
    /// - [`ClientError::Source`] if the source rejects the request
    pub async fn subscribe_to_system_event(&self, event_id: u32, name: &str) -> Result<()> {
        validate_user_id(event_id)?;
        self.ensure_session()?;

        self.requests()
            .register(RequestKind::SystemEvent, event_id, name);
        if let Err(error) = self
            .inner
            .source
            .subscribe_to_system_event(event_id, name)
            .await
        {
            self.requests()
                .unregister(RequestKind::SystemEvent, event_id);
            return Err(error.into());
        }
        Ok(())
    }

    /// Stops delivery of a system event subscribed under `event_id`.
    ///
    /// # Errors
    ///
    /// Same as [`subscribe_to_system_event`](Self::subscribe_to_system_event).
    pub async fn unsubscribe_from_system_event(&self, event_id: u32) -> Result<()> {
        validate_user_id(event_id)?;
        self.ensure_session()?;

        self.inner
            .source
            .unsubscribe_from_system_event(event_id)
            .await?;
        self.requests()
            .unregister(RequestKind::SystemEvent, event_id);
        Ok(())
    }

    /// Appends a datum to the data definition `define_id`.
    ///
    /// The definition's registry entry lists its datums under `"datums"`.
    ///
    /// # Errors
    ///
    /// Same as [`subscribe_to_system_event`](Self::subscribe_to_system_event).
    pub async fn add_to_data_definition(
        &self,
        define_id: u32,
        datum_name: &str,
        units: &str,
        data_type: DataType,
    ) -> Result<()> {
        validate_user_id(define_id)?;
        self.ensure_session()?;

        let requests = self.requests();
        let existing = requests.get(RequestKind::DataDefinition, define_id);
        let context = match &existing {
            Some(entry) => entry.context.clone(),
            None => requests.register(RequestKind::DataDefinition, define_id, "data_definition"),
        };

        if let Err(error) = self
            .inner
            .source
            .add_to_data_definition(define_id, datum_name, units, data_type)
            .await
        {
            if existing.is_none() {
                requests.unregister(RequestKind::DataDefinition, define_id);
            }
            return Err(error.into());
        }

        let mut datums = match context.get("datums") {
            Some(serde_json::Value::Array(datums)) => datums,
            _ => Vec::new(),
        };
        datums.push(json!({ "name": datum_name, "units": units, "type": data_type }));
        context.insert("datums", datums);
        Ok(())
    }

    /// Clears the data definition `define_id`.
    ///
    /// # Errors
    ///
    /// Same as [`subscribe_to_system_event`](Self::subscribe_to_system_event).
    pub async fn clear_data_definition(&self, define_id: u32) -> Result<()> {
        validate_user_id(define_id)?;
        self.ensure_session()?;

        self.inner.source.clear_data_definition(define_id).await?;
        self.requests()
            .unregister(RequestKind::DataDefinition, define_id);
        Ok(())
    }

    /// Requests the data of `define_id` on `object_id` at `period`.
    ///
    /// Answers carry `request_id`. A [`DataPeriod::Once`] request completes
    /// with its first answer; [`DataPeriod::Never`] cancels the request.
    ///
    /// # Errors
    ///
    /// Same as [`subscribe_to_system_event`](Self::subscribe_to_system_event),
    /// checked for both ids.
    pub async fn request_data_on_sim_object(
        &self,
        request_id: u32,
        define_id: u32,
        object_id: u32,
        period: DataPeriod,
    ) -> Result<()> {
        validate_user_id(request_id)?;
        validate_user_id(define_id)?;
        self.ensure_session()?;

        let requests = self.requests();
        let context = match period {
            DataPeriod::Never => None,
            DataPeriod::Once => Some(requests.register_one_shot(
                RequestKind::DataRequest,
                request_id,
                "request_data_on_sim_object",
            )),
            _ => Some(requests.register(
                RequestKind::DataRequest,
                request_id,
                "request_data_on_sim_object",
            )),
        };
        if let Some(context) = &context {
            context.insert("define_id", define_id);
            context.insert("object_id", object_id);
            context.insert("period", period.to_string());
        }

        let result = self
            .inner
            .source
            .request_data_on_sim_object(request_id, define_id, object_id, period)
            .await;

        if result.is_err() || context.is_none() {
            requests.unregister(RequestKind::DataRequest, request_id);
        }
        result.map_err(ClientError::from)
    }
}

fn envelope_kind(envelope: &Arc<Envelope>) -> MessageKind {
    envelope.kind
}
