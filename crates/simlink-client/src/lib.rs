//! # SimLink Client
//!
//! Reconnecting, multi-consumer event bus over a simulator message stream.
//!
//! A [`SimClient`] owns one [`MessageSource`](simlink_transport_traits::MessageSource)
//! and keeps a session open for as long as it runs: it connects with retry,
//! registers its internal events and polled state once the simulator signals
//! ready, and reconnects after the simulator goes away.
//!
//! ## Features
//!
//! - Connection lifecycle with timeouts, retry budget and automatic reconnect
//! - Ordered, single-task dispatch with panic-isolated handlers
//! - Bounded subscriptions with predicate or kind filters and drop reporting
//! - Simulator state model with significance-filtered change notifications
//! - Request and data definition correlation registry
//! - Named custom events with a bounded id allocator
//! - `config`-crate loading with `SIMLINK__*` environment overrides
//! - `tracing` logging with optional JSON and rolling files
//!
//! ## Architecture
//!
//! ```text
//! Application (handlers, subscriptions, requests)
//!        ↓
//! SimClient (this crate)
//!        ↓
//! MessageSource (simlink-transport-traits)
//!        ↓
//! Simulator SDK
//! ```
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use simlink_client::{ClientBuilder, ConnectionState, SubscriptionOptions};
//! use simlink_transport_traits::{ChannelSource, MessageKind};
//!
//! # async fn example() -> simlink_client::Result<()> {
//! let (source, feed) = ChannelSource::new();
//! let client = ClientBuilder::new()
//!     .with_client_name("cockpit")
//!     .with_max_retries(3)
//!     .build(source)?;
//!
//! client.on_connection_state(|change| {
//!     println!("{} -> {}", change.previous, change.current);
//! });
//! client.on_pause(|paused| println!("paused: {paused}"));
//!
//! let mut data = client.subscribe_kinds(
//!     SubscriptionOptions::new().named("data").with_capacity(64),
//!     [MessageKind::SimObjectData],
//! )?;
//!
//! client.start()?;
//! client
//!     .wait_for_state(ConnectionState::Available, Duration::from_secs(30))
//!     .await;
//!
//! while let Some(envelope) = data.recv().await {
//!     println!("data for request {}", envelope.request_id);
//! }
//! # drop(feed);
//! client.shutdown().await?;
//! # Ok(())
//! # }
//! ```

#![warn(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub,
    clippy::all
)]
#![deny(unsafe_code)]
#![cfg_attr(docsrs, feature(doc_cfg))]
#![allow(
    clippy::module_name_repetitions,
    clippy::missing_errors_doc,
    clippy::must_use_candidate
)]

pub mod client;
pub mod correlation;
pub mod custom_events;
pub mod error;
pub mod handlers;
pub mod ids;
pub mod logging;
pub mod metrics;
pub mod state;
pub mod subscriptions;

pub use client::{ClientBuilder, ClientConfig, ENV_PREFIX, SimClient};
pub use correlation::{RequestContext, RequestEntry, RequestKind, RequestRegistry};
pub use custom_events::{CustomEvent, CustomEventAllocator};
pub use error::{ClientError, Result};
pub use handlers::{HandlerCategory, HandlerId};
pub use ids::{InternalEvent, USER_ID_MAX, is_internal_id, is_reserved_name, validate_user_id};
pub use logging::{LogOutput, LogRotation, LoggingConfig, LoggingGuard};
pub use metrics::{ClientMetrics, MetricsSnapshot};
pub use state::{
    ConnectionState, ConnectionStateChange, EventFlags, ModeFields, PolledState, SimState,
    SimStateChange, Telemetry,
};
pub use subscriptions::{DropCallback, Subscription, SubscriptionId, SubscriptionOptions};
