//! Core message source trait.

use async_trait::async_trait;

use crate::error::SourceResult;
use crate::message::Envelope;
use crate::types::{DataPeriod, DataType, SourceRequest};

/// The upstream collaborator that owns the link to the external process.
///
/// A source yields decoded envelopes for one session at a time. After
/// [`next_message`](MessageSource::next_message) returns `None` the session is
/// over and the source must accept a fresh [`connect`](MessageSource::connect).
#[async_trait]
pub trait MessageSource: Send + Sync + std::fmt::Debug {
    /// Establishes a session, announcing the client under `client_name`.
    async fn connect(&self, client_name: &str) -> SourceResult<()>;

    /// Waits for the next envelope of the current session.
    ///
    /// Returns `None` once the session has ended. An unrecoverable stream
    /// failure is reported as an envelope with `error` set.
    async fn next_message(&self) -> Option<Envelope>;

    /// Tears the current session down. Calling it without a session is a no-op.
    async fn disconnect(&self) -> SourceResult<()>;

    /// Issues a typed request against the current session.
    async fn send_request(&self, request: SourceRequest) -> SourceResult<()>;

    /// Subscribes to a named system event under `event_id`.
    async fn subscribe_to_system_event(&self, event_id: u32, name: &str) -> SourceResult<()> {
        self.send_request(SourceRequest::SubscribeToSystemEvent {
            event_id,
            name: name.to_string(),
        })
        .await
    }

    /// Stops delivery of a system event.
    async fn unsubscribe_from_system_event(&self, event_id: u32) -> SourceResult<()> {
        self.send_request(SourceRequest::UnsubscribeFromSystemEvent { event_id })
            .await
    }

    /// Appends a datum to a data definition.
    async fn add_to_data_definition(
        &self,
        define_id: u32,
        datum_name: &str,
        units: &str,
        data_type: DataType,
    ) -> SourceResult<()> {
        self.send_request(SourceRequest::AddToDataDefinition {
            define_id,
            datum_name: datum_name.to_string(),
            units: units.to_string(),
            data_type,
        })
        .await
    }

    /// Clears a data definition.
    async fn clear_data_definition(&self, define_id: u32) -> SourceResult<()> {
        self.send_request(SourceRequest::ClearDataDefinition { define_id })
            .await
    }

    /// Requests a definition's data on an object at a cadence.
    async fn request_data_on_sim_object(
        &self,
        request_id: u32,
        define_id: u32,
        object_id: u32,
        period: DataPeriod,
    ) -> SourceResult<()> {
        self.send_request(SourceRequest::RequestDataOnSimObject {
            request_id,
            define_id,
            object_id,
            period,
        })
        .await
    }
}
