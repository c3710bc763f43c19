//! Core types for plant state.

use core::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::error::ParseError;

/// Location of a coil, discrete input or register on the field bus.
///
/// `bus_address` is the unit id of the board, `index` the channel or
/// register number on that board.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct DeviceAddress {
    /// Unit id of the board on the bus.
    pub bus_address: u8,
    /// Channel or register index on the board.
    pub index: u16,
}

impl DeviceAddress {
    /// Create a new device address.
    #[must_use]
    pub const fn new(bus_address: u8, index: u16) -> Self {
        Self { bus_address, index }
    }
}

impl fmt::Display for DeviceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.bus_address, self.index)
    }
}

/// Logical identity of a sensor, e.g. `"boiler_supply"`.
///
/// Several sensors may share one physical board; they are told apart by
/// this id, never by their address.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(transparent))]
pub struct SensorId(String);

impl SensorId {
    /// Create a sensor id.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SensorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SensorId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for SensorId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl core::borrow::Borrow<str> for SensorId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// A sensor value as seen by control loops.
///
/// `value` is `None` when the transport failed to deliver a reading.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SensorReading {
    /// Which sensor produced this reading.
    pub sensor_id: SensorId,
    /// Decoded value, if the read succeeded.
    pub value: Option<f64>,
    /// When the value was read from the bus.
    #[cfg_attr(feature = "serde", serde(with = "time::serde::rfc3339"))]
    pub observed_at: OffsetDateTime,
}

impl SensorReading {
    /// Whether the reading carries a value.
    #[must_use]
    pub fn is_available(&self) -> bool {
        self.value.is_some()
    }
}

/// Decode a raw holding register as a signed value times `scale`.
///
/// Temperature boards report tenths of a degree as two's complement, so a
/// raw `100` with scale `0.1` is `10.0` and `0xFFF6` is `-1.0`.
#[must_use]
pub fn decode_register(raw: u16, scale: f64) -> f64 {
    f64::from(raw as i16) * scale
}

/// Boiler activity as classified from the supply temperature trend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[repr(u8)]
pub enum BoilerStatus {
    /// No trend baseline yet.
    #[default]
    Init = 0,
    /// Burner is heating.
    Works = 1,
    /// Burner is resting.
    Idle = 2,
    /// Temperatures or relay state are unavailable.
    Error = 3,
}

impl BoilerStatus {
    /// Numeric code of the status.
    #[must_use]
    pub fn code(self) -> u8 {
        self as u8
    }

    /// Human-readable label.
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            BoilerStatus::Init => "initializing",
            BoilerStatus::Works => "working",
            BoilerStatus::Idle => "idle",
            BoilerStatus::Error => "error",
        }
    }
}

impl TryFrom<u8> for BoilerStatus {
    type Error = ParseError;

    fn try_from(value: u8) -> Result<Self, ParseError> {
        match value {
            0 => Ok(BoilerStatus::Init),
            1 => Ok(BoilerStatus::Works),
            2 => Ok(BoilerStatus::Idle),
            3 => Ok(BoilerStatus::Error),
            code => Err(ParseError::UnknownCode {
                kind: "boiler status",
                code,
            }),
        }
    }
}

impl fmt::Display for BoilerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Output of the heat demand hysteresis switch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[repr(u8)]
pub enum HeatDemandStatus {
    /// Outdoor temperature is low enough to heat.
    NeedHeat = 0,
    /// Outdoor temperature is above target.
    NoNeedHeat = 1,
    /// Outdoor sensor unavailable.
    Error = 2,
}

impl HeatDemandStatus {
    /// Numeric code of the status.
    #[must_use]
    pub fn code(self) -> u8 {
        self as u8
    }

    /// Human-readable label.
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            HeatDemandStatus::NeedHeat => "heating required",
            HeatDemandStatus::NoNeedHeat => "no heating required",
            HeatDemandStatus::Error => "error",
        }
    }

    /// Whether consumers should heat. `Error` fails safe toward heating.
    #[must_use]
    pub fn requires_heat(self) -> bool {
        !matches!(self, HeatDemandStatus::NoNeedHeat)
    }
}

impl fmt::Display for HeatDemandStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Plant health tier published by the health aggregator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[repr(u8)]
pub enum HealthStatus {
    /// Nothing reported since the last tick.
    #[default]
    Ok = 0,
    /// Only non-critical problems reported.
    MinorProblems = 1,
    /// At least one critical problem reported.
    Emergency = 2,
}

impl HealthStatus {
    /// Numeric code of the tier.
    #[must_use]
    pub fn code(self) -> u8 {
        self as u8
    }

    /// Human-readable label.
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            HealthStatus::Ok => "all systems normal",
            HealthStatus::MinorProblems => "minor problems",
            HealthStatus::Emergency => "emergency",
        }
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Which boiler temperature series a value belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum TemperatureKind {
    /// Boiler supply (direct) temperature.
    Supply,
    /// Boiler return temperature.
    Return,
}

/// Kind of a reconstructed history interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum IntervalKind {
    /// Burner was working.
    Work,
    /// Burner was idle.
    Idle,
}

/// A contiguous run of work or idle time.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct WorkIdleInterval {
    /// Length of the run in minutes.
    pub duration_minutes: f64,
    /// Whether the burner was working or idle.
    pub kind: IntervalKind,
}

/// Manual override of the boiler relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum RelayOverride {
    /// Relay follows heat demand.
    #[default]
    Auto,
    /// Relay held energized.
    ForceOn,
    /// Relay held released.
    ForceOff,
}

impl fmt::Display for RelayOverride {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RelayOverride::Auto => write!(f, "automatic"),
            RelayOverride::ForceOn => write!(f, "forced on"),
            RelayOverride::ForceOff => write!(f, "forced off"),
        }
    }
}

/// Lowest control voltage of the valve actuator (fully closed).
pub const VALVE_MIN_VOLTS: f64 = 2.0;

/// Highest control voltage of the valve actuator (fully open).
pub const VALVE_MAX_VOLTS: f64 = 10.0;

/// Mixing valve opening in whole percent, always within `0..=100`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ValvePosition(u8);

impl ValvePosition {
    /// Fully closed.
    pub const CLOSED: Self = Self(0);
    /// Fully open.
    pub const OPEN: Self = Self(100);

    /// Clamp an arbitrary percentage into a position.
    #[must_use]
    pub fn from_percent(percent: f64) -> Self {
        if percent.is_nan() {
            return Self::CLOSED;
        }
        Self(percent.round().clamp(0.0, 100.0) as u8)
    }

    /// Derive the position from an actuator control voltage.
    #[must_use]
    pub fn from_volts(volts: f64) -> Self {
        Self::from_percent((volts - VALVE_MIN_VOLTS) / (VALVE_MAX_VOLTS - VALVE_MIN_VOLTS) * 100.0)
    }

    /// Control voltage that drives the actuator to this position.
    #[must_use]
    pub fn to_volts(self) -> f64 {
        VALVE_MIN_VOLTS + f64::from(self.0) / 100.0 * (VALVE_MAX_VOLTS - VALVE_MIN_VOLTS)
    }

    /// The opening in percent.
    #[must_use]
    pub fn percent(self) -> u8 {
        self.0
    }

    /// Whether the valve is at either end stop.
    #[must_use]
    pub fn is_end_stop(self) -> bool {
        self.0 == 0 || self.0 == 100
    }
}

impl fmt::Display for ValvePosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}%", self.0)
    }
}
