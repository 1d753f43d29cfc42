//! Connection and simulator state.
//!
//! [`SimState`] combines three groups of fields:
//!
//! - [`EventFlags`] are toggled only by incoming system events.
//! - [`ModeFields`] are polled but discrete (camera, rate, VR, ground).
//! - [`Telemetry`] is polled and varies continuously.
//!
//! Change detection ([`SimState::significant_eq`]) looks at the first two
//! groups only, so per-second polling does not fire a notification every time
//! the aircraft moves.

use std::fmt;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use simlink_transport_traits::{DataType, SourceError, SourceResult};

use crate::ids::InternalEvent;

/// Link state between the client and the simulator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// No session. Initial and terminal state.
    #[default]
    Disconnected,
    /// A connect attempt is running.
    Connecting,
    /// The session is established but the simulator has not sent its ready signal.
    Connected,
    /// The simulator is ready and internal registrations are in place.
    Available,
    /// Waiting out the reconnect delay after a session ended.
    Reconnecting,
}

impl ConnectionState {
    /// Returns `true` while a session is open.
    pub const fn has_session(self) -> bool {
        matches!(self, Self::Connected | Self::Available)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
            Self::Available => write!(f, "available"),
            Self::Reconnecting => write!(f, "reconnecting"),
        }
    }
}

/// A connection state transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionStateChange {
    /// State before the transition.
    pub previous: ConnectionState,
    /// State after the transition.
    pub current: ConnectionState,
    /// 1-based connect attempt within the current connect cycle, 0 outside one.
    pub attempt: u32,
}

/// Fields driven by system events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct EventFlags {
    /// The simulation is paused.
    pub paused: bool,
    /// A flight is running.
    pub sim_running: bool,
    /// The user aircraft has crashed.
    pub crashed: bool,
    /// Last reported sound id.
    pub sound: u32,
    /// Last reported view id.
    pub view: u32,
}

impl EventFlags {
    /// Applies a system event and reports whether any field changed.
    ///
    /// File and object events carry no flag and always return `false`.
    pub fn apply(&mut self, event: InternalEvent, data: u32) -> bool {
        let before = *self;
        match event {
            InternalEvent::Pause => self.paused = data != 0,
            InternalEvent::Sim => self.sim_running = data != 0,
            InternalEvent::Crashed => self.crashed = true,
            InternalEvent::CrashReset => self.crashed = false,
            InternalEvent::Sound => self.sound = data,
            InternalEvent::View => self.view = data,
            InternalEvent::FlightLoaded
            | InternalEvent::AircraftLoaded
            | InternalEvent::FlightPlanActivated
            | InternalEvent::ObjectAdded
            | InternalEvent::ObjectRemoved => {}
        }
        *self != before
    }
}

/// Polled fields that change in discrete steps.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ModeFields {
    /// Camera state code.
    pub camera_state: u32,
    /// Camera sub-state code.
    pub camera_substate: u32,
    /// Simulation rate multiplier.
    pub simulation_rate: f64,
    /// Flight model realism, 0.0 to 1.0.
    pub realism: f64,
    /// The user is in VR.
    pub is_in_vr: bool,
    /// The user aircraft is on the ground.
    pub on_ground: bool,
}

impl ModeFields {
    /// Field-wise equality where two NaN readings count as the same value.
    pub fn same_mode(&self, other: &Self) -> bool {
        self.camera_state == other.camera_state
            && self.camera_substate == other.camera_substate
            && same_reading(self.simulation_rate, other.simulation_rate)
            && same_reading(self.realism, other.realism)
            && self.is_in_vr == other.is_in_vr
            && self.on_ground == other.on_ground
    }
}

fn same_reading(a: f64, b: f64) -> bool {
    a == b || (a.is_nan() && b.is_nan())
}

/// Polled fields that vary continuously.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Telemetry {
    /// Degrees.
    pub latitude: f64,
    /// Degrees.
    pub longitude: f64,
    /// Feet.
    pub altitude: f64,
    /// Degrees true.
    pub heading: f64,
    /// Degrees.
    pub pitch: f64,
    /// Degrees.
    pub bank: f64,
    /// Knots.
    pub ground_speed: f64,
    /// Celsius.
    pub ambient_temperature: f64,
    /// Millibars.
    pub barometric_pressure: f64,
    /// Knots.
    pub wind_velocity: f64,
    /// Degrees.
    pub wind_direction: f64,
    /// Seconds since local midnight.
    pub local_time: f64,
    /// Seconds since zulu midnight.
    pub zulu_time: f64,
    /// Seconds since the flight started.
    pub simulation_time: f64,
}

/// One snapshot of the simulator.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct SimState {
    /// Event-driven fields.
    pub events: EventFlags,
    /// Polled discrete fields.
    pub modes: ModeFields,
    /// Polled continuous fields.
    pub telemetry: Telemetry,
}

impl SimState {
    /// Compares only the fields that count as a change of state.
    ///
    /// Two snapshots that differ only in telemetry compare equal, and a NaN
    /// mode reading equals another NaN reading.
    pub fn significant_eq(&self, other: &Self) -> bool {
        self.events == other.events && self.modes.same_mode(&other.modes)
    }

    /// Merges a poll into this snapshot, keeping the event-driven fields.
    pub fn with_polled(&self, polled: PolledState) -> Self {
        Self {
            events: self.events,
            modes: polled.modes,
            telemetry: polled.telemetry,
        }
    }
}

/// A simulator state change.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SimStateChange {
    /// Snapshot before the change.
    pub previous: SimState,
    /// Snapshot after the change.
    pub current: SimState,
}

/// Datum names, units and types of the polled state definition, in payload order.
pub const SIM_STATE_FIELDS: &[(&str, &str, DataType)] = &[
    ("CAMERA STATE", "Number", DataType::Float64),
    ("CAMERA SUBSTATE", "Number", DataType::Float64),
    ("SIMULATION RATE", "Number", DataType::Float64),
    ("REALISM", "Number", DataType::Float64),
    ("IS IN VR", "Bool", DataType::Float64),
    ("SIM ON GROUND", "Bool", DataType::Float64),
    ("PLANE LATITUDE", "degrees", DataType::Float64),
    ("PLANE LONGITUDE", "degrees", DataType::Float64),
    ("PLANE ALTITUDE", "feet", DataType::Float64),
    ("PLANE HEADING DEGREES TRUE", "degrees", DataType::Float64),
    ("PLANE PITCH DEGREES", "degrees", DataType::Float64),
    ("PLANE BANK DEGREES", "degrees", DataType::Float64),
    ("GROUND VELOCITY", "knots", DataType::Float64),
    ("AMBIENT TEMPERATURE", "celsius", DataType::Float64),
    ("BAROMETER PRESSURE", "millibars", DataType::Float64),
    ("AMBIENT WIND VELOCITY", "knots", DataType::Float64),
    ("AMBIENT WIND DIRECTION", "degrees", DataType::Float64),
    ("LOCAL TIME", "seconds", DataType::Float64),
    ("ZULU TIME", "seconds", DataType::Float64),
    ("SIMULATION TIME", "seconds", DataType::Float64),
];

/// The polled part of a snapshot, as decoded from one data payload.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PolledState {
    /// Discrete polled fields.
    pub modes: ModeFields,
    /// Continuous polled fields.
    pub telemetry: Telemetry,
}

impl PolledState {
    /// Payload size in bytes.
    pub fn encoded_len() -> usize {
        SIM_STATE_FIELDS.iter().map(|(_, _, ty)| ty.size()).sum()
    }

    /// Decodes a payload laid out by [`SIM_STATE_FIELDS`].
    ///
    /// Trailing bytes are ignored; a short payload is a decode error.
    pub fn decode(mut data: &[u8]) -> SourceResult<Self> {
        let needed = Self::encoded_len();
        if data.len() < needed {
            return Err(SourceError::Decode(format!(
                "state payload is {} bytes, expected {needed}",
                data.len()
            )));
        }

        let modes = ModeFields {
            camera_state: data.get_f64_le() as u32,
            camera_substate: data.get_f64_le() as u32,
            simulation_rate: data.get_f64_le(),
            realism: data.get_f64_le(),
            is_in_vr: data.get_f64_le() != 0.0,
            on_ground: data.get_f64_le() != 0.0,
        };
        let telemetry = Telemetry {
            latitude: data.get_f64_le(),
            longitude: data.get_f64_le(),
            altitude: data.get_f64_le(),
            heading: data.get_f64_le(),
            pitch: data.get_f64_le(),
            bank: data.get_f64_le(),
            ground_speed: data.get_f64_le(),
            ambient_temperature: data.get_f64_le(),
            barometric_pressure: data.get_f64_le(),
            wind_velocity: data.get_f64_le(),
            wind_direction: data.get_f64_le(),
            local_time: data.get_f64_le(),
            zulu_time: data.get_f64_le(),
            simulation_time: data.get_f64_le(),
        };

        Ok(Self { modes, telemetry })
    }

    /// Encodes in the layout [`decode`](Self::decode) expects.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(Self::encoded_len());
        let m = &self.modes;
        let t = &self.telemetry;
        for value in [
            f64::from(m.camera_state),
            f64::from(m.camera_substate),
            m.simulation_rate,
            m.realism,
            f64::from(u8::from(m.is_in_vr)),
            f64::from(u8::from(m.on_ground)),
            t.latitude,
            t.longitude,
            t.altitude,
            t.heading,
            t.pitch,
            t.bank,
            t.ground_speed,
            t.ambient_temperature,
            t.barometric_pressure,
            t.wind_velocity,
            t.wind_direction,
            t.local_time,
            t.zulu_time,
            t.simulation_time,
        ] {
            buf.put_f64_le(value);
        }
        buf.freeze()
    }
}
