//! Envelope types produced by a message source.

use bytes::Bytes;

use crate::error::SourceError;
use crate::types::{MessageKind, ObjectType};

/// Details sent by the external process when a session becomes ready.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OpenInfo {
    /// Name of the external application.
    pub application_name: String,
    /// Application version as `(major, minor)`.
    pub application_version: (u32, u32),
    /// Protocol version as `(major, minor)`.
    pub protocol_version: (u32, u32),
}

/// A fired event: `event_id` is the id it was subscribed under.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EventData {
    /// Notification group, if any.
    pub group_id: u32,
    /// Id given when subscribing.
    pub event_id: u32,
    /// Event specific value (pause flag, sound id, view id, ...).
    pub data: u32,
}

/// An event that carries a file name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilenameEvent {
    /// Id given when subscribing.
    pub event_id: u32,
    /// Full path reported by the process.
    pub filename: String,
    /// Event specific flags.
    pub flags: u32,
}

/// An object entering or leaving the simulation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObjectEvent {
    /// Id given when subscribing.
    pub event_id: u32,
    /// Kind of object.
    pub object_type: ObjectType,
    /// Process assigned object id.
    pub object_id: u32,
}

/// Data answering a `request_data_on_sim_object` request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SimObjectData {
    /// Correlation id supplied with the request.
    pub request_id: u32,
    /// Layout of `data`.
    pub define_id: u32,
    /// Object the data describes.
    pub object_id: u32,
    /// Index of this entry in a multi-entry answer (1-based).
    pub entry_number: u32,
    /// Total entries in a multi-entry answer.
    pub out_of: u32,
    /// Raw datum values in definition order.
    pub data: Bytes,
}

/// A request the external process refused.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExceptionInfo {
    /// Process specific exception code.
    pub exception: u32,
    /// Send id of the offending request.
    pub send_id: u32,
    /// Index of the offending parameter.
    pub index: u32,
}

/// Decoded body of an envelope.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Payload {
    /// No body.
    #[default]
    None,
    /// Session ready.
    Open(OpenInfo),
    /// Event fired.
    Event(EventData),
    /// Event with a file name.
    Filename(FilenameEvent),
    /// Object added or removed.
    ObjectAddRemove(ObjectEvent),
    /// Requested object data.
    SimObjectData(SimObjectData),
    /// Refused request.
    Exception(ExceptionInfo),
    /// Undecoded bytes for message codes without a dedicated variant.
    Raw(Bytes),
}

/// One decoded unit from the external message stream.
///
/// An envelope whose `error` is set reports a stream failure; its payload
/// carries nothing usable.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    /// Identifying code.
    pub kind: MessageKind,
    /// Correlation id (request id for data, event id for events).
    pub request_id: u32,
    /// Decoded body.
    pub payload: Payload,
    /// Stream failure reported in place of a message.
    pub error: Option<SourceError>,
}

impl Envelope {
    /// Builds an envelope from explicit parts.
    pub const fn from_parts(kind: MessageKind, request_id: u32, payload: Payload) -> Self {
        Self {
            kind,
            request_id,
            payload,
            error: None,
        }
    }

    /// Session ready envelope.
    pub fn open(info: OpenInfo) -> Self {
        Self::from_parts(MessageKind::Open, 0, Payload::Open(info))
    }

    /// The external process is exiting.
    pub const fn quit() -> Self {
        Self::from_parts(MessageKind::Quit, 0, Payload::None)
    }

    /// Keep-alive envelope.
    pub const fn null() -> Self {
        Self::from_parts(MessageKind::Null, 0, Payload::None)
    }

    /// Event fired under `event_id` with `data`.
    pub const fn event(event_id: u32, data: u32) -> Self {
        Self::from_parts(
            MessageKind::Event,
            event_id,
            Payload::Event(EventData {
                group_id: 0,
                event_id,
                data,
            }),
        )
    }

    /// Event carrying a file name.
    pub fn filename(event_id: u32, filename: impl Into<String>) -> Self {
        Self::from_parts(
            MessageKind::EventFilename,
            event_id,
            Payload::Filename(FilenameEvent {
                event_id,
                filename: filename.into(),
                flags: 0,
            }),
        )
    }

    /// Object add/remove event.
    pub const fn object(event_id: u32, object_type: ObjectType, object_id: u32) -> Self {
        Self::from_parts(
            MessageKind::EventObjectAddRemove,
            event_id,
            Payload::ObjectAddRemove(ObjectEvent {
                event_id,
                object_type,
                object_id,
            }),
        )
    }

    /// Single-entry data answer for `request_id` laid out by `define_id`.
    pub fn sim_object_data(request_id: u32, define_id: u32, data: impl Into<Bytes>) -> Self {
        Self::from_parts(
            MessageKind::SimObjectData,
            request_id,
            Payload::SimObjectData(SimObjectData {
                request_id,
                define_id,
                object_id: 0,
                entry_number: 1,
                out_of: 1,
                data: data.into(),
            }),
        )
    }

    /// Refused request.
    pub const fn exception(info: ExceptionInfo) -> Self {
        Self::from_parts(MessageKind::Exception, info.send_id, Payload::Exception(info))
    }

    /// Stream failure reported as an envelope.
    pub const fn failed(error: SourceError) -> Self {
        Self {
            kind: MessageKind::Exception,
            request_id: 0,
            payload: Payload::None,
            error: Some(error),
        }
    }

    /// Returns `true` if this envelope reports a stream failure.
    pub const fn is_error(&self) -> bool {
        self.error.is_some()
    }

    /// Event id for event-class envelopes.
    pub const fn event_id(&self) -> Option<u32> {
        match &self.payload {
            Payload::Event(e) => Some(e.event_id),
            Payload::Filename(e) => Some(e.event_id),
            Payload::ObjectAddRemove(e) => Some(e.event_id),
            _ => None,
        }
    }
}
