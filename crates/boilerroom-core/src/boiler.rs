//! Boiler status estimation from the supply temperature trend.
//!
//! The boiler exposes no "burner on" signal. Its state is inferred each
//! tick from the relay coil and the supply/return temperatures:
//!
//! | Condition | Status |
//! |-----------|--------|
//! | relay coil off | `Idle` |
//! | relay unreadable or a temperature missing | `Error` |
//! | no trend baseline yet | `Init` |
//! | supply rising, or within tolerance of the run maximum, and supply - return above the minimum delta | `Works` |
//! | anything else | `Idle` |
//!
//! When the boiler drops from `Works` to `Idle` while the supply is still
//! above a fraction of the climate curve target, the relay is switched off
//! so the burner does not immediately fire again.

use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::{debug, info, warn};

use boilerroom_types::{BoilerStatus, DeviceAddress, SensorId, TemperatureKind};

use crate::cache::SensorCache;
use crate::curve::ClimateCurve;
use crate::error::{Error, Result};
use crate::events::{HealthEvent, HealthEvents};
use crate::history::History;
use crate::transport::FieldTransport;
use crate::util::{format_temperature, lock};

/// Boiler wiring and trend thresholds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BoilerConfig {
    /// Coil that enables the boiler.
    pub relay: DeviceAddress,
    /// Boiler supply (direct) temperature sensor.
    pub supply_sensor: SensorId,
    /// Boiler return temperature sensor.
    pub return_sensor: SensorId,
    /// Outdoor sensor used for the climate curve.
    pub outdoor_sensor: SensorId,
    /// How far the supply may fall below the run maximum and still count as working.
    pub drop_tolerance: f64,
    /// Minimum supply - return difference while working.
    pub min_delta: f64,
    /// Share of the curve target above which a stopping burner gets its relay released.
    pub short_cycle_fraction: f64,
}

impl Default for BoilerConfig {
    fn default() -> Self {
        Self {
            relay: DeviceAddress::new(2, 0),
            supply_sensor: SensorId::from("boiler_supply"),
            return_sensor: SensorId::from("boiler_return"),
            outdoor_sensor: SensorId::from("outdoor"),
            drop_tolerance: 2.0,
            min_delta: 3.0,
            short_cycle_fraction: 0.9,
        }
    }
}

impl BoilerConfig {
    /// Check the thresholds.
    pub fn validate(&self) -> Result<()> {
        if !self.drop_tolerance.is_finite() || self.drop_tolerance < 0.0 {
            return Err(Error::invalid_config("drop_tolerance must be >= 0"));
        }
        if !self.min_delta.is_finite() {
            return Err(Error::invalid_config("min_delta must be finite"));
        }
        if !(self.short_cycle_fraction > 0.0 && self.short_cycle_fraction <= 1.5) {
            return Err(Error::invalid_config(
                "short_cycle_fraction must be in (0, 1.5]",
            ));
        }
        Ok(())
    }
}

/// Trend memory carried between ticks.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct EstimatorMemory {
    /// Supply temperature of the previous classified tick.
    pub last_direct_temperature: Option<f64>,
    /// Highest supply temperature of the current working run.
    pub max_direct_temperature: Option<f64>,
}

impl EstimatorMemory {
    /// Forget everything.
    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

/// Classify one pair of temperatures and update the memory.
pub fn classify(
    memory: &mut EstimatorMemory,
    supply: f64,
    ret: f64,
    drop_tolerance: f64,
    min_delta: f64,
) -> BoilerStatus {
    let Some(last) = memory.last_direct_temperature else {
        memory.last_direct_temperature = Some(supply);
        return BoilerStatus::Init;
    };

    let rising = supply > last;
    let holding = memory
        .max_direct_temperature
        .is_some_and(|max| supply >= max - drop_tolerance);
    let status = if (rising || holding) && supply - ret > min_delta {
        memory.max_direct_temperature = Some(
            memory
                .max_direct_temperature
                .map_or(supply, |max| max.max(supply)),
        );
        BoilerStatus::Works
    } else {
        memory.max_direct_temperature = None;
        BoilerStatus::Idle
    };
    memory.last_direct_temperature = Some(supply);
    status
}

#[derive(Debug, Default)]
struct EstimatorState {
    status: BoilerStatus,
    memory: EstimatorMemory,
    supply: Option<f64>,
    ret: Option<f64>,
    relay_on: Option<bool>,
}

/// Periodic boiler status estimator. The only writer of [`History`].
pub struct BoilerEstimator {
    config: BoilerConfig,
    curve: ClimateCurve,
    transport: FieldTransport,
    cache: Arc<SensorCache>,
    history: Arc<History>,
    events: HealthEvents,
    state: Mutex<EstimatorState>,
}

impl BoilerEstimator {
    /// Create an estimator in `Init`.
    pub fn new(
        config: BoilerConfig,
        curve: ClimateCurve,
        transport: FieldTransport,
        cache: Arc<SensorCache>,
        history: Arc<History>,
        events: HealthEvents,
    ) -> Self {
        Self {
            config,
            curve,
            transport,
            cache,
            history,
            events,
            state: Mutex::new(EstimatorState::default()),
        }
    }

    /// Current status.
    pub fn status(&self) -> BoilerStatus {
        lock(&self.state).status
    }

    /// Current trend memory.
    pub fn memory(&self) -> EstimatorMemory {
        lock(&self.state).memory
    }

    /// Last supply and return temperatures.
    pub fn temperatures(&self) -> (Option<f64>, Option<f64>) {
        let state = lock(&self.state);
        (state.supply, state.ret)
    }

    fn sensor_failure(&self, sensor: &SensorId) {
        self.events.emit(HealthEvent::SensorPollFailure {
            sensor: sensor.clone(),
            critical: self.cache.is_critical(sensor.as_str()),
        });
    }

    fn set_error(&self) -> BoilerStatus {
        let mut state = lock(&self.state);
        if state.status != BoilerStatus::Error {
            warn!("Boiler status: {} -> {}", state.status, BoilerStatus::Error);
        }
        state.status = BoilerStatus::Error;
        state.memory.clear();
        BoilerStatus::Error
    }

    /// Run one estimation tick at the current time.
    pub async fn tick(&self) -> BoilerStatus {
        self.tick_at(OffsetDateTime::now_utc()).await
    }

    /// Run one estimation tick, recording history under `now`.
    pub async fn tick_at(&self, now: OffsetDateTime) -> BoilerStatus {
        let relay_on = match self.transport.read_coil(self.config.relay).await {
            Ok(on) => on,
            Err(e) => {
                warn!("Cannot read boiler relay {}: {}", self.config.relay, e);
                self.events.emit(HealthEvent::BusPollFailure);
                lock(&self.state).relay_on = None;
                return self.set_error();
            }
        };

        let supply = self.cache.get(self.config.supply_sensor.as_str()).await.ok();
        let ret = self.cache.get(self.config.return_sensor.as_str()).await.ok();

        if !relay_on {
            return self.record_relay_off(supply, ret, now);
        }

        let (Some(supply_t), Some(ret_t)) = (supply, ret) else {
            if supply.is_none() {
                self.sensor_failure(&self.config.supply_sensor);
            }
            if ret.is_none() {
                self.sensor_failure(&self.config.return_sensor);
            }
            {
                let mut state = lock(&self.state);
                state.relay_on = Some(true);
                state.supply = supply;
                state.ret = ret;
            }
            return self.set_error();
        };

        let (previous, next) = {
            let mut state = lock(&self.state);
            let previous = state.status;
            let next = classify(
                &mut state.memory,
                supply_t,
                ret_t,
                self.config.drop_tolerance,
                self.config.min_delta,
            );
            state.status = next;
            state.supply = Some(supply_t);
            state.ret = Some(ret_t);
            state.relay_on = Some(true);
            (previous, next)
        };

        self.history.record_status(next, now);
        self.history
            .record_temperature(TemperatureKind::Supply, supply_t, now);
        self.history
            .record_temperature(TemperatureKind::Return, ret_t, now);

        if previous != next {
            info!(
                "Boiler status: {} -> {} (supply {:.1}, return {:.1})",
                previous, next, supply_t, ret_t
            );
        } else {
            debug!("Boiler status: {} (supply {:.1}, return {:.1})", next, supply_t, ret_t);
        }

        if previous == BoilerStatus::Works && next == BoilerStatus::Idle {
            self.short_cycle_guard(supply_t).await;
        }
        next
    }

    fn record_relay_off(
        &self,
        supply: Option<f64>,
        ret: Option<f64>,
        now: OffsetDateTime,
    ) -> BoilerStatus {
        {
            let mut state = lock(&self.state);
            if state.status != BoilerStatus::Idle {
                info!("Boiler status: {} -> {} (relay off)", state.status, BoilerStatus::Idle);
            }
            state.status = BoilerStatus::Idle;
            state.memory.max_direct_temperature = None;
            if supply.is_some() {
                state.memory.last_direct_temperature = supply;
            }
            state.supply = supply;
            state.ret = ret;
            state.relay_on = Some(false);
        }

        self.history.record_status(BoilerStatus::Idle, now);
        if let Some(t) = supply {
            self.history.record_temperature(TemperatureKind::Supply, t, now);
        }
        if let Some(t) = ret {
            self.history.record_temperature(TemperatureKind::Return, t, now);
        }
        BoilerStatus::Idle
    }

    async fn short_cycle_guard(&self, supply: f64) {
        let outdoor = self.cache.get(self.config.outdoor_sensor.as_str()).await.ok();
        let target = self.curve.target_or_default(outdoor);
        let limit = self.config.short_cycle_fraction * target;
        if supply <= limit {
            return;
        }

        info!(
            "Burner stopped at {:.1}°C (limit {:.1}°C), releasing boiler relay",
            supply, limit
        );
        match self
            .transport
            .write_coil(self.config.relay.bus_address, self.config.relay.index, false)
            .await
        {
            Ok(()) => lock(&self.state).relay_on = Some(false),
            Err(e) => {
                warn!("Failed to release boiler relay: {}", e);
                self.events.emit(HealthEvent::BoilerRelayFailure);
            }
        }
    }

    /// Human-readable status including the recent power estimate.
    pub fn format_status(&self) -> String {
        let (status, supply, ret, relay_on, max) = {
            let state = lock(&self.state);
            (
                state.status,
                state.supply,
                state.ret,
                state.relay_on,
                state.memory.max_direct_temperature,
            )
        };
        let relay = match relay_on {
            Some(true) => "on",
            Some(false) => "off",
            None => "unknown",
        };
        let estimate = self.history.estimate_recent_power(OffsetDateTime::now_utc());

        let mut text = format!(
            "Boiler: {}\nRelay: {}\nSupply: {}, return: {}",
            status,
            relay,
            format_temperature(supply),
            format_temperature(ret)
        );
        if let Some(max) = max {
            text.push_str(&format!("\nRun maximum: {:.1}°C", max));
        }
        text.push_str(&format!(
            "\nRecent output: {:.1} kW at {:.0}% duty",
            estimate.power_kw, estimate.duty_cycle_percent
        ));
        text
    }
}
