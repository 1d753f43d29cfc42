//! Core message source types.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifying code of an inbound envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    /// Keep-alive with no content.
    Null,
    /// The external process reported a failed request.
    Exception,
    /// The session is ready for use.
    Open,
    /// The external process is shutting down.
    Quit,
    /// A subscribed system or custom event fired.
    Event,
    /// An event carrying a file name (flight, aircraft, flight plan).
    EventFilename,
    /// An object was added to or removed from the simulation.
    EventObjectAddRemove,
    /// Data returned for a `request_data_on_sim_object` request.
    SimObjectData,
    /// A message code this crate has no dedicated variant for.
    Other(u32),
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "null"),
            Self::Exception => write!(f, "exception"),
            Self::Open => write!(f, "open"),
            Self::Quit => write!(f, "quit"),
            Self::Event => write!(f, "event"),
            Self::EventFilename => write!(f, "event_filename"),
            Self::EventObjectAddRemove => write!(f, "event_object_add_remove"),
            Self::SimObjectData => write!(f, "sim_object_data"),
            Self::Other(code) => write!(f, "other({code})"),
        }
    }
}

/// How often the external process sends data for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DataPeriod {
    /// Stop sending.
    Never,
    /// Send a single time.
    Once,
    /// Every rendered frame.
    VisualFrame,
    /// Every simulation frame.
    SimFrame,
    /// Once per second.
    #[default]
    Second,
}

impl fmt::Display for DataPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Never => write!(f, "never"),
            Self::Once => write!(f, "once"),
            Self::VisualFrame => write!(f, "visual_frame"),
            Self::SimFrame => write!(f, "sim_frame"),
            Self::Second => write!(f, "second"),
        }
    }
}

/// Wire type of a single datum in a data definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    /// 32-bit signed integer.
    Int32,
    /// 64-bit signed integer.
    Int64,
    /// 32-bit float.
    Float32,
    /// 64-bit float.
    #[default]
    Float64,
    /// Fixed 8-byte string.
    String8,
    /// Fixed 260-byte string.
    String260,
}

impl DataType {
    /// Size of one value on the wire, in bytes.
    pub const fn size(self) -> usize {
        match self {
            Self::Int32 | Self::Float32 => 4,
            Self::Int64 | Self::Float64 | Self::String8 => 8,
            Self::String260 => 260,
        }
    }
}

/// Category of object reported in add/remove events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectType {
    /// The user's own aircraft.
    User,
    /// Any type.
    All,
    /// Fixed-wing aircraft.
    Aircraft,
    /// Rotorcraft.
    Helicopter,
    /// Boats.
    Boat,
    /// Ground vehicles.
    Ground,
    /// Anything the SDK reports that has no variant here.
    Other(u32),
}

/// A typed request issued against the external process.
///
/// Every id is supplied by the caller; the process echoes them back in the
/// envelopes that answer the request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SourceRequest {
    /// Start receiving a named system event under `event_id`.
    SubscribeToSystemEvent {
        /// Caller chosen event id
        event_id: u32,
        /// System event name
        name: String,
    },
    /// Stop receiving a system event.
    UnsubscribeFromSystemEvent {
        /// Event id used when subscribing
        event_id: u32,
    },
    /// Append a datum to a data definition.
    AddToDataDefinition {
        /// Definition the datum belongs to
        define_id: u32,
        /// Simulation variable name
        datum_name: String,
        /// Units string understood by the process
        units: String,
        /// Wire type
        data_type: DataType,
    },
    /// Remove every datum from a data definition.
    ClearDataDefinition {
        /// Definition to clear
        define_id: u32,
    },
    /// Ask for a definition's data on an object at a cadence.
    RequestDataOnSimObject {
        /// Correlation id echoed in the response envelopes
        request_id: u32,
        /// Layout of the returned payload
        define_id: u32,
        /// Target object; 0 is the user aircraft
        object_id: u32,
        /// Cadence
        period: DataPeriod,
    },
}

impl SourceRequest {
    /// Short label for logs and error messages.
    pub const fn label(&self) -> &'static str {
        match self {
            Self::SubscribeToSystemEvent { .. } => "subscribe_to_system_event",
            Self::UnsubscribeFromSystemEvent { .. } => "unsubscribe_from_system_event",
            Self::AddToDataDefinition { .. } => "add_to_data_definition",
            Self::ClearDataDefinition { .. } => "clear_data_definition",
            Self::RequestDataOnSimObject { .. } => "request_data_on_sim_object",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_kind_display() {
        assert_eq!(MessageKind::Open.to_string(), "open");
        assert_eq!(MessageKind::SimObjectData.to_string(), "sim_object_data");
        assert_eq!(MessageKind::Other(77).to_string(), "other(77)");
    }

    #[test]
    fn test_data_period_default() {
        assert_eq!(DataPeriod::default(), DataPeriod::Second);
    }

    #[test]
    fn test_data_type_sizes() {
        assert_eq!(DataType::Float64.size(), 8);
        assert_eq!(DataType::Int32.size(), 4);
        assert_eq!(DataType::String260.size(), 260);
    }

    #[test]
    fn test_request_labels() {
        let req = SourceRequest::ClearDataDefinition { define_id: 3 };
        assert_eq!(req.label(), "clear_data_definition");
    }
}
