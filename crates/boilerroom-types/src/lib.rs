//! Platform-agnostic types for the boilerroom plant controller.
//!
//! This crate provides the data model shared by the control core and the
//! service: bus addresses, sensor identities and readings, and the discrete
//! status enums with their numeric codes and display labels.
//!
//! # Example
//!
//! ```
//! use boilerroom_types::{decode_register, BoilerStatus, ValvePosition};
//!
//! assert_eq!(decode_register(215, 0.1), 21.5);
//! assert_eq!(BoilerStatus::Works.code(), 1);
//! assert_eq!(ValvePosition::from_volts(6.0).percent(), 50);
//! ```

pub mod error;
pub mod types;

pub use error::ParseError;
pub use types::{
    decode_register, BoilerStatus, DeviceAddress, HealthStatus, HeatDemandStatus, IntervalKind,
    RelayOverride, SensorId, SensorReading, TemperatureKind, ValvePosition, WorkIdleInterval,
    VALVE_MAX_VOLTS, VALVE_MIN_VOLTS,
};
