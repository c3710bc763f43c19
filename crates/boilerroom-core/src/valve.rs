//! Mixing valve position controller.
//!
//! The floor heating loop is fed through a motorized mixing valve. The
//! actuator is powered through a relay and positioned by a 2-10 V control
//! voltage held in a holding register. It has no position feedback: the
//! current opening is recomputed every tick from the last written voltage.
//!
//! A move is a fixed sequence on the bus:
//!
//! 1. energize the actuator relay
//! 2. write the control voltage for the target opening
//! 3. wait for the mechanical travel time
//! 4. release the relay
//!
//! The wait only blocks the valve task; other loops keep using the
//! transport meanwhile. When closing, the actuator first runs back through
//! zero, so the travel time covers both the current and the target opening.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::sleep;
use tracing::{debug, info, warn};

use boilerroom_types::{BoilerStatus, DeviceAddress, SensorId, VALVE_MAX_VOLTS, ValvePosition};

use crate::cache::SensorCache;
use crate::curve::ClimateCurve;
use crate::error::{Error, Result};
use crate::events::{HealthEvent, HealthEvents};
use crate::transport::FieldTransport;
use crate::util::{format_temperature, lock};

/// Relay name used in health events.
const VALVE_RELAY: &str = "mixing_valve";

/// Valve wiring and control parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValveConfig {
    /// Coil powering the actuator.
    pub relay: DeviceAddress,
    /// Register holding the control voltage.
    pub voltage_register: DeviceAddress,
    /// Volts per register count.
    pub volts_per_unit: f64,
    /// Boiler water before the valve.
    pub pre_mix_sensor: SensorId,
    /// Floor supply after the valve.
    pub post_mix_sensor: SensorId,
    /// Floor loop return.
    pub floor_return_sensor: SensorId,
    /// Outdoor sensor for the floor curve.
    pub outdoor_sensor: SensorId,
    /// Room sensors averaged for the indoor correction.
    pub indoor_sensors: Vec<SensorId>,
    /// Desired room temperature.
    pub set_point: f64,
    /// Degrees of supply correction per degree of room error.
    pub indoor_weight: f64,
    /// Supply error tolerated without moving.
    pub temperature_accuracy: f64,
    /// Opening change in percent below which no move is made.
    pub percent_accuracy: f64,
    /// Seconds for a full 0-100% stroke.
    pub full_travel_seconds: f64,
    /// Extra seconds added per direction change.
    pub reserve_seconds: f64,
}

impl Default for ValveConfig {
    fn default() -> Self {
        Self {
            relay: DeviceAddress::new(2, 1),
            voltage_register: DeviceAddress::new(3, 0),
            volts_per_unit: 0.01,
            pre_mix_sensor: SensorId::from("boiler_supply"),
            post_mix_sensor: SensorId::from("floor_supply"),
            floor_return_sensor: SensorId::from("floor_return"),
            outdoor_sensor: SensorId::from("outdoor"),
            indoor_sensors: vec![SensorId::from("living_room")],
            set_point: 21.0,
            indoor_weight: 2.0,
            temperature_accuracy: 1.0,
            percent_accuracy: 3.0,
            full_travel_seconds: 120.0,
            reserve_seconds: 5.0,
        }
    }
}

impl ValveConfig {
    /// Check the parameters.
    pub fn validate(&self) -> Result<()> {
        if !self.volts_per_unit.is_finite() || self.volts_per_unit <= 0.0 {
            return Err(Error::invalid_config("volts_per_unit must be > 0"));
        }
        if register_value(VALVE_MAX_VOLTS, self.volts_per_unit).is_err() {
            return Err(Error::invalid_config(format!(
                "volts_per_unit must be at least {:.6} so {} V fits a register",
                VALVE_MAX_VOLTS / f64::from(u16::MAX),
                VALVE_MAX_VOLTS
            )));
        }
        if self.indoor_sensors.is_empty() {
            return Err(Error::invalid_config("at least one indoor sensor is required"));
        }
        for (name, value) in [
            ("temperature_accuracy", self.temperature_accuracy),
            ("percent_accuracy", self.percent_accuracy),
            ("full_travel_seconds", self.full_travel_seconds),
            ("reserve_seconds", self.reserve_seconds),
            ("indoor_weight", self.indoor_weight),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(Error::invalid_config(format!("{} must be >= 0", name)));
            }
        }
        Ok(())
    }

    fn full_travel(&self) -> Duration {
        Duration::from_secs_f64(self.full_travel_seconds)
    }

    fn reserve(&self) -> Duration {
        Duration::from_secs_f64(self.reserve_seconds)
    }
}

/// Floor supply target corrected by the room temperature error, kept within the curve's range.
pub fn target_supply(
    curve: &ClimateCurve,
    outdoor: Option<f64>,
    indoor: f64,
    set_point: f64,
    weight: f64,
) -> f64 {
    let base = curve.target_or_default(outdoor);
    (base + weight * (set_point - indoor)).clamp(curve.lower_bound(), curve.upper_bound())
}

/// Opening that mixes `pre_mix` and `floor_return` water to `target`.
pub fn target_percent(target: f64, pre_mix: f64, floor_return: f64) -> f64 {
    let span = pre_mix - floor_return;
    if span.abs() < f64::EPSILON {
        return if target > floor_return { 100.0 } else { 0.0 };
    }
    ((target - floor_return) / span * 100.0).clamp(0.0, 100.0)
}

/// Whether a move from `current` to `target` is worth making.
///
/// End stops are always driven so the actuator can settle against them.
pub fn needs_move(current: ValvePosition, target: ValvePosition, percent_accuracy: f64) -> bool {
    let delta = f64::from(target.percent()) - f64::from(current.percent());
    delta.abs() >= percent_accuracy || target.is_end_stop()
}

/// Mechanical travel time of a move.
pub fn travel_time(
    current: ValvePosition,
    target: ValvePosition,
    full_travel: Duration,
    reserve: Duration,
) -> Duration {
    let current = f64::from(current.percent());
    let target = f64::from(target.percent());
    if target >= current {
        full_travel.mul_f64((target - current) / 100.0) + reserve
    } else {
        full_travel.mul_f64((current + target) / 100.0) + reserve * 2
    }
}

/// Register count for a control voltage.
pub fn register_value(volts: f64, volts_per_unit: f64) -> Result<u16> {
    let raw = (volts / volts_per_unit).round();
    if !raw.is_finite() || raw < 0.0 || raw > f64::from(u16::MAX) {
        return Err(Error::invalid_config(format!(
            "{:.2} V does not fit a register at {} V per count",
            volts, volts_per_unit
        )));
    }
    Ok(raw as u16)
}

/// What a valve tick did.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ValveOutcome {
    /// Boiler not working; nothing to mix.
    BoilerNotWorking,
    /// No indoor sensor could be read.
    NoIndoorReading,
    /// Floor supply already close to target.
    WithinAccuracy { target: f64, actual: f64 },
    /// The computed opening is close to the current one.
    AlreadyPositioned { position: ValvePosition },
    /// The valve was moved.
    Moved {
        from: ValvePosition,
        to: ValvePosition,
        travel: Duration,
    },
    /// A read or write failed; the tick was aborted.
    Failed,
}

#[derive(Debug, Default)]
struct ValveState {
    position: Option<ValvePosition>,
    target_supply: Option<f64>,
    last_outcome: Option<ValveOutcome>,
}

/// Drives the mixing valve toward the floor supply target.
pub struct ValveController {
    config: ValveConfig,
    curve: ClimateCurve,
    transport: FieldTransport,
    cache: Arc<SensorCache>,
    events: HealthEvents,
    state: Mutex<ValveState>,
}

impl ValveController {
    /// Create a controller.
    pub fn new(
        config: ValveConfig,
        curve: ClimateCurve,
        transport: FieldTransport,
        cache: Arc<SensorCache>,
        events: HealthEvents,
    ) -> Self {
        Self {
            config,
            curve,
            transport,
            cache,
            events,
            state: Mutex::new(ValveState::default()),
        }
    }

    /// Valve opening derived from the last voltage read or written.
    pub fn position(&self) -> Option<ValvePosition> {
        lock(&self.state).position
    }

    /// Outcome of the last tick.
    pub fn last_outcome(&self) -> Option<ValveOutcome> {
        lock(&self.state).last_outcome
    }

    fn finish(&self, outcome: ValveOutcome) -> ValveOutcome {
        lock(&self.state).last_outcome = Some(outcome);
        outcome
    }

    fn fail(&self, what: &str, error: impl std::fmt::Display) -> ValveOutcome {
        warn!("Valve control aborted, {}: {}", what, error);
        self.events.emit(HealthEvent::ValveCalculationFailure);
        self.finish(ValveOutcome::Failed)
    }

    async fn indoor_average(&self) -> Option<f64> {
        let mut readings = Vec::with_capacity(self.config.indoor_sensors.len());
        for sensor in &self.config.indoor_sensors {
            match self.cache.get(sensor.as_str()).await {
                Ok(value) => readings.push(value),
                Err(e) => debug!("Indoor sensor {} skipped: {}", sensor, e),
            }
        }
        if readings.is_empty() {
            None
        } else {
            Some(readings.iter().sum::<f64>() / readings.len() as f64)
        }
    }

    /// Run one control tick for the given boiler status.
    pub async fn tick(&self, boiler: BoilerStatus) -> ValveOutcome {
        if boiler != BoilerStatus::Works {
            debug!("Valve idle: boiler is {}", boiler);
            return self.finish(ValveOutcome::BoilerNotWorking);
        }

        let Some(indoor) = self.indoor_average().await else {
            warn!("No indoor temperature available, skipping valve control");
            return self.finish(ValveOutcome::NoIndoorReading);
        };
        let outdoor = self.cache.get(self.config.outdoor_sensor.as_str()).await.ok();
        let target = target_supply(
            &self.curve,
            outdoor,
            indoor,
            self.config.set_point,
            self.config.indoor_weight,
        );
        lock(&self.state).target_supply = Some(target);

        let actual = match self.cache.get(self.config.post_mix_sensor.as_str()).await {
            Ok(v) => v,
            Err(e) => return self.fail("floor supply unreadable", e),
        };
        if (target - actual).abs() <= self.config.temperature_accuracy {
            debug!("Floor supply {:.1} within accuracy of {:.1}", actual, target);
            return self.finish(ValveOutcome::WithinAccuracy { target, actual });
        }

        let reg = self.config.voltage_register;
        let current = match self.transport.read_register(reg.bus_address, reg.index).await {
            Ok(raw) => ValvePosition::from_volts(f64::from(raw) * self.config.volts_per_unit),
            Err(e) => return self.fail("control voltage unreadable", e),
        };
        lock(&self.state).position = Some(current);

        let pre_mix = match self.cache.get(self.config.pre_mix_sensor.as_str()).await {
            Ok(v) => v,
            Err(e) => return self.fail("pre-mix supply unreadable", e),
        };
        let floor_return = match self.cache.get(self.config.floor_return_sensor.as_str()).await {
            Ok(v) => v,
            Err(e) => return self.fail("floor return unreadable", e),
        };

        let wanted = ValvePosition::from_percent(target_percent(target, pre_mix, floor_return));
        if !needs_move(current, wanted, self.config.percent_accuracy) {
            debug!("Valve at {} already close to {}", current, wanted);
            return self.finish(ValveOutcome::AlreadyPositioned { position: current });
        }

        self.actuate(current, wanted).await
    }

    fn relay_failed(&self, what: &str, error: impl std::fmt::Display) -> ValveOutcome {
        self.events.emit(HealthEvent::AncillaryRelayFailure {
            relay: VALVE_RELAY.to_string(),
        });
        self.fail(what, error)
    }

    async fn actuate(&self, from: ValvePosition, to: ValvePosition) -> ValveOutcome {
        let relay = self.config.relay;
        let reg = self.config.voltage_register;
        let travel = travel_time(from, to, self.config.full_travel(), self.config.reserve());
        let raw = match register_value(to.to_volts(), self.config.volts_per_unit) {
            Ok(raw) => raw,
            Err(e) => return self.fail("control voltage not representable", e),
        };

        info!("Moving mixing valve {} -> {} ({:.1}s)", from, to, travel.as_secs_f64());

        if let Err(e) = self.transport.write_coil(relay.bus_address, relay.index, true).await {
            return self.relay_failed("actuator relay not energized", e);
        }
        if let Err(e) = self.transport.write_register(reg.bus_address, reg.index, raw).await {
            self.events.emit(HealthEvent::BusWriteFailure);
            // Do not leave the actuator powered without a new set point
            if let Err(release) = self
                .transport
                .write_coil(relay.bus_address, relay.index, false)
                .await
            {
                warn!("Actuator relay left energized: {}", release);
                self.events.emit(HealthEvent::AncillaryRelayFailure {
                    relay: VALVE_RELAY.to_string(),
                });
            }
            return self.fail("control voltage not written", e);
        }
        lock(&self.state).position = Some(to);

        sleep(travel).await;

        if let Err(e) = self.transport.write_coil(relay.bus_address, relay.index, false).await {
            return self.relay_failed("actuator relay not released", e);
        }
        self.finish(ValveOutcome::Moved { from, to, travel })
    }

    /// Human-readable status.
    pub fn format_status(&self) -> String {
        let state = lock(&self.state);
        let position = state
            .position
            .map_or_else(|| "unknown".to_string(), |p| p.to_string());
        let outcome = match state.last_outcome {
            None => "not run yet".to_string(),
            Some(ValveOutcome::BoilerNotWorking) => "idle, boiler not working".to_string(),
            Some(ValveOutcome::NoIndoorReading) => "skipped, no indoor temperature".to_string(),
            Some(ValveOutcome::WithinAccuracy { actual, .. }) => {
                format!("holding, floor supply {:.1}°C on target", actual)
            }
            Some(ValveOutcome::AlreadyPositioned { .. }) => "holding position".to_string(),
            Some(ValveOutcome::Moved { from, to, travel }) => {
                format!("moved {} -> {} in {:.0}s", from, to, travel.as_secs_f64())
            }
            Some(ValveOutcome::Failed) => "failed".to_string(),
        };
        format!(
            "Mixing valve: {}\nTarget floor supply: {}\nLast tick: {}",
            position,
            format_temperature(state.target_supply),
            outcome
        )
    }
}
