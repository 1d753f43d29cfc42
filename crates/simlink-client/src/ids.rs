//! Numeric id space shared between the client and its callers.
//!
//! Request, definition and event ids all come from the same `u32` space. Ids
//! up to [`USER_ID_MAX`] belong to callers; everything from
//! [`INTERNAL_ID_MIN`] upward is used by the client for its own system event
//! subscriptions, the polled state definition and custom events.

use crate::error::{ClientError, Result};

/// Highest id callers may use.
pub const USER_ID_MAX: u32 = 999_999_999;

/// Lowest id the client reserves for itself.
pub const INTERNAL_ID_MIN: u32 = 1_000_000_000;

/// Data definition id of the polled simulator state.
pub const STATE_DEFINITION_ID: u32 = INTERNAL_ID_MIN + 100;

/// Request id of the polled simulator state.
pub const STATE_REQUEST_ID: u32 = INTERNAL_ID_MIN + 101;

/// First id handed out to custom events.
pub const CUSTOM_EVENT_MIN: u32 = INTERNAL_ID_MIN + 1_000;

/// Last id handed out to custom events.
pub const CUSTOM_EVENT_MAX: u32 = INTERNAL_ID_MIN + 9_999;

/// Fixed system events the client subscribes to on every session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum InternalEvent {
    /// Pause toggled; data is 1 when paused.
    Pause = INTERNAL_ID_MIN,
    /// Simulation started (data 1) or stopped (data 0).
    Sim,
    /// The user aircraft crashed.
    Crashed,
    /// The crash state was cleared.
    CrashReset,
    /// Master sound toggled; data is the sound id.
    Sound,
    /// Camera view changed; data is the view id.
    View,
    /// A flight file was loaded.
    FlightLoaded,
    /// An aircraft file was loaded.
    AircraftLoaded,
    /// A flight plan was activated.
    FlightPlanActivated,
    /// An object joined the simulation.
    ObjectAdded,
    /// An object left the simulation.
    ObjectRemoved,
}

impl InternalEvent {
    /// Every internal event, in subscription order.
    pub const ALL: [Self; 11] = [
        Self::Pause,
        Self::Sim,
        Self::Crashed,
        Self::CrashReset,
        Self::Sound,
        Self::View,
        Self::FlightLoaded,
        Self::AircraftLoaded,
        Self::FlightPlanActivated,
        Self::ObjectAdded,
        Self::ObjectRemoved,
    ];

    /// The event id this event is subscribed under.
    pub const fn id(self) -> u32 {
        self as u32
    }

    /// Looks an event up by id.
    pub fn from_id(id: u32) -> Option<Self> {
        Self::ALL.into_iter().find(|event| event.id() == id)
    }

    /// The system event name understood by the simulator.
    pub const fn system_event_name(self) -> &'static str {
        match self {
            Self::Pause => "Pause",
            Self::Sim => "Sim",
            Self::Crashed => "Crashed",
            Self::CrashReset => "CrashReset",
            Self::Sound => "Sound",
            Self::View => "View",
            Self::FlightLoaded => "FlightLoaded",
            Self::AircraftLoaded => "AircraftLoaded",
            Self::FlightPlanActivated => "FlightPlanActivated",
            Self::ObjectAdded => "ObjectAdded",
            Self::ObjectRemoved => "ObjectRemoved",
        }
    }
}

/// Built-in system event names a custom event may not take, on top of the
/// [`InternalEvent`] names.
pub const RESERVED_EVENT_NAMES: &[&str] = &[
    "1sec",
    "4sec",
    "6Hz",
    "Frame",
    "PauseFrame",
    "Pause_EX1",
    "Paused",
    "Unpaused",
    "PositionChanged",
    "SimStart",
    "SimStop",
    "FlightSaved",
    "FlightPlanDeactivated",
];

/// Returns `true` if `name` is a built-in event name (case-insensitive).
pub fn is_reserved_name(name: &str) -> bool {
    InternalEvent::ALL
        .iter()
        .map(|event| event.system_event_name())
        .chain(RESERVED_EVENT_NAMES.iter().copied())
        .any(|reserved| reserved.eq_ignore_ascii_case(name))
}

/// Returns `true` if `id` lies in the internal range.
pub const fn is_internal_id(id: u32) -> bool {
    id >= INTERNAL_ID_MIN
}

/// Rejects ids from the internal range.
pub fn validate_user_id(id: u32) -> Result<()> {
    if id > USER_ID_MAX {
        return Err(ClientError::ReservedId(id));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_internal_ids_are_contiguous_and_reserved() {
        for (offset, event) in InternalEvent::ALL.iter().enumerate() {
            assert_eq!(event.id(), INTERNAL_ID_MIN + offset as u32);
            assert!(is_internal_id(event.id()));
            assert_eq!(InternalEvent::from_id(event.id()), Some(*event));
        }
        assert_eq!(InternalEvent::from_id(42), None);
    }

    #[test]
    fn test_ranges_do_not_overlap() {
        let last_internal = InternalEvent::ObjectRemoved.id();
        assert!(last_internal < STATE_DEFINITION_ID);
        assert!(STATE_REQUEST_ID < CUSTOM_EVENT_MIN);
        assert!(CUSTOM_EVENT_MIN <= CUSTOM_EVENT_MAX);
    }

    #[test]
    fn test_validate_user_id() {
        assert!(validate_user_id(0).is_ok());
        assert!(validate_user_id(USER_ID_MAX).is_ok());
        assert!(matches!(
            validate_user_id(INTERNAL_ID_MIN),
            Err(ClientError::ReservedId(INTERNAL_ID_MIN))
        ));
    }

    #[test]
    fn test_reserved_names_ignore_case() {
        assert!(is_reserved_name("Pause"));
        assert!(is_reserved_name("pause"));
        assert!(is_reserved_name("6HZ"));
        assert!(is_reserved_name("simstart"));
        assert!(!is_reserved_name("Foo"));
    }
}
