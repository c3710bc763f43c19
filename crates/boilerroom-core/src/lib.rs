//! Control core for a small heating plant on a shared field bus.
//!
//! This crate contains everything between the Modbus wire and the operator:
//! a serialized bus transport, a TTL sensor cache, the estimators that turn
//! temperature trends into discrete plant states, the mixing valve
//! controller and the health and history bookkeeping.
//!
//! # Features
//!
//! - **Serialized transport**: one worker owns the bus link, every operation
//!   is followed by a settle delay, the link reconnects lazily
//! - **Sensor cache**: per-sensor TTL memo with per-key locking
//! - **Boiler status**: `Init`/`Works`/`Idle`/`Error` from the supply trend
//! - **Heat demand**: outdoor temperature hysteresis switch
//! - **Climate curves**: clamped linear outdoor-to-target mapping
//! - **Mixing valve**: target opening, move decision and timed actuation
//! - **Boiler relay gate**: ignition gated by return temperature, manual override
//! - **Health**: three-tier status from queued events, notification on change
//! - **History**: 24 h rolling series, duty cycle, ignitions and power estimate
//!
//! # Components
//!
//! | Component | Ticks | Reads | Writes |
//! |-----------|-------|-------|--------|
//! | [`BoilerRelayGate`] | yes | relay coil, outdoor, boiler return | relay coil |
//! | [`BoilerEstimator`] | yes | relay coil, boiler supply/return, outdoor | [`History`], relay coil |
//! | [`HeatDemandController`] | yes | outdoor | - |
//! | [`ValveController`] | yes | indoor, outdoor, floor temps, voltage | valve relay, voltage |
//! | [`TemperatureAlarms`] | yes | alarm sensors | - |
//! | [`HealthAggregator`] | yes | health channel | [`Notifier`] |
//!
//! # Quick Start
//!
//! ```
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use boilerroom_core::{
//!     FieldTransport, HeatDemandConfig, HeatDemandController, MockBus, SensorCache,
//!     SensorSpec, TransportOptions, health_channel,
//! };
//! use boilerroom_types::{DeviceAddress, HeatDemandStatus};
//!
//! #[tokio::main]
//! async fn main() {
//!     let bus = MockBus::new();
//!     bus.set_temperature(DeviceAddress::new(1, 0), -4.5);
//!
//!     let transport = FieldTransport::spawn(bus.clone(), TransportOptions::default());
//!     let cache = Arc::new(
//!         SensorCache::new(transport, Duration::from_secs(1))
//!             .with_sensor("outdoor", SensorSpec::new(DeviceAddress::new(1, 0))),
//!     );
//!     let (events, _rx) = health_channel(64);
//!
//!     let demand = HeatDemandController::new(HeatDemandConfig::default(), cache, events);
//!     assert_eq!(demand.tick().await, HeatDemandStatus::NeedHeat);
//! }
//! ```

pub mod alarms;
pub mod boiler;
pub mod cache;
pub mod curve;
pub mod demand;
pub mod error;
pub mod events;
pub mod health;
pub mod history;
pub mod mock;
pub mod modbus;
pub mod notify;
pub mod relay;
pub mod traits;
pub mod transport;
pub mod valve;

mod util;

pub use alarms::{AlarmRule, AlarmState, TemperatureAlarms};
pub use boiler::{BoilerConfig, BoilerEstimator, EstimatorMemory, classify};
pub use cache::{DEFAULT_SCALE, SensorCache, SensorSpec};
pub use curve::ClimateCurve;
pub use demand::{HeatDemandConfig, HeatDemandController};
pub use error::{Error, Result, TransportError};
pub use events::{
    HealthEvent, HealthEvents, HealthReceiver, Severity, default_health_channel, health_channel,
};
pub use health::HealthAggregator;
pub use history::{History, HistoryConfig, PowerEstimate, WATER_HEAT_CAPACITY};
pub use mock::{BusOp, MockBus};
pub use modbus::{ModbusTcpConnector, ModbusTcpLink};
pub use notify::{LogNotifier, MemoryNotifier, Notifier};
pub use relay::{BoilerRelayGate, GateReason};
pub use traits::{BusConnector, BusLink, LinkResult};
pub use transport::{FieldTransport, TransportOptions, TransportSnapshot};
pub use valve::{ValveConfig, ValveController, ValveOutcome};

// Re-export the shared data types
pub use boilerroom_types::{
    BoilerStatus, DeviceAddress, HealthStatus, HeatDemandStatus, RelayOverride, SensorId,
    SensorReading, ValvePosition,
};
