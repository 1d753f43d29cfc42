//! Client core implementation
//!
//! The client is decomposed into focused modules:
//!
//! - `core`: Main `SimClient<S>` implementation and public API
//! - `builder`: `ClientBuilder` pattern for construction
//! - `config`: Configuration types and loading
//! - `lifecycle`: Connect, retry and reconnect loop
//! - `dispatcher`: Envelope classification and fan-out
//! - `shared`: State shared by the lifecycle task and callers
//!
//! `SimClient<S>` is cloneable via `Arc<ClientInner<S>>`.

pub mod builder;
pub mod config;
pub mod core;
pub(crate) mod dispatcher;
pub(crate) mod lifecycle;
pub(crate) mod shared;

pub use self::builder::ClientBuilder;
pub use self::config::{ClientConfig, ENV_PREFIX};
pub use self::core::SimClient;
