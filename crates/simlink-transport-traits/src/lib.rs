//! # SimLink Transport Traits
//!
//! Message-source traits and envelope types for SimLink. This crate is the
//! seam between whatever talks to the simulator SDK and the event bus in
//! `simlink-client`.
//!
//! ## Overview
//!
//! This crate defines:
//! - **Traits**: [`MessageSource`]
//! - **Envelopes**: [`Envelope`], [`Payload`] and the payload structs
//! - **Types**: [`MessageKind`], [`SourceRequest`], [`DataPeriod`], [`DataType`], [`ObjectType`]
//! - **Errors**: [`SourceError`], [`SourceResult`]
//! - **Sources**: [`ChannelSource`] and its producer half [`ChannelFeed`]
//!
//! ## Usage
//!
//! SDK bindings implement [`MessageSource`] directly, or run their native
//! callback loop on a thread of their own and push decoded envelopes through a
//! [`ChannelFeed`]:
//!
//! ```rust,ignore
//! use simlink_transport_traits::{Envelope, MessageSource, SourceRequest, SourceResult};
//! use async_trait::async_trait;
//!
//! #[derive(Debug)]
//! struct SdkSource { /* ... */ }
//!
//! #[async_trait]
//! impl MessageSource for SdkSource {
//!     async fn connect(&self, client_name: &str) -> SourceResult<()> { /* ... */ }
//!     // ... other trait methods
//! }
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

mod channel;
mod error;
mod message;
mod traits;
mod types;

// Re-export all public items
pub use channel::{ChannelFeed, ChannelSource};
pub use error::{SourceError, SourceResult};
pub use message::{
    Envelope, EventData, ExceptionInfo, FilenameEvent, ObjectEvent, OpenInfo, Payload,
    SimObjectData,
};
pub use traits::MessageSource;
pub use types::{DataPeriod, DataType, MessageKind, ObjectType, SourceRequest};
