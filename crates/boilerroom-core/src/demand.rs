//! Heat demand from outdoor temperature with hysteresis.

use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use boilerroom_types::{HeatDemandStatus, SensorId};

use crate::cache::SensorCache;
use crate::error::{Error, Result};
use crate::events::{HealthEvent, HealthEvents};
use crate::util::{format_temperature, lock};

/// Heat demand thresholds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeatDemandConfig {
    /// Sensor measuring outdoor temperature.
    pub outdoor_sensor: SensorId,
    /// Above this outdoor temperature no heat is needed.
    pub target: f64,
    /// Heat is needed again below `target - hysteresis`.
    pub hysteresis: f64,
}

impl Default for HeatDemandConfig {
    fn default() -> Self {
        Self {
            outdoor_sensor: SensorId::from("outdoor"),
            target: 16.0,
            hysteresis: 2.0,
        }
    }
}

impl HeatDemandConfig {
    /// Check the thresholds.
    pub fn validate(&self) -> Result<()> {
        if !self.target.is_finite() {
            return Err(Error::invalid_config("heat demand target must be finite"));
        }
        if !self.hysteresis.is_finite() || self.hysteresis < 0.0 {
            return Err(Error::invalid_config(
                "heat demand hysteresis must be a non-negative number",
            ));
        }
        Ok(())
    }
}

/// Next status for an outdoor temperature.
///
/// Inside the hysteresis band the current status is kept; coming out of
/// `Error` inside the band resolves to `NeedHeat`.
pub fn next_status(
    current: HeatDemandStatus,
    outdoor: f64,
    target: f64,
    hysteresis: f64,
) -> HeatDemandStatus {
    if outdoor < target - hysteresis {
        HeatDemandStatus::NeedHeat
    } else if outdoor > target {
        HeatDemandStatus::NoNeedHeat
    } else if current == HeatDemandStatus::Error {
        HeatDemandStatus::NeedHeat
    } else {
        current
    }
}

#[derive(Debug)]
struct DemandState {
    status: HeatDemandStatus,
    outdoor: Option<f64>,
}

/// Decides whether the house needs heat.
pub struct HeatDemandController {
    config: HeatDemandConfig,
    cache: Arc<SensorCache>,
    events: HealthEvents,
    state: Mutex<DemandState>,
}

impl HeatDemandController {
    /// Create a controller. It starts in `NeedHeat`.
    pub fn new(config: HeatDemandConfig, cache: Arc<SensorCache>, events: HealthEvents) -> Self {
        Self {
            config,
            cache,
            events,
            state: Mutex::new(DemandState {
                status: HeatDemandStatus::NeedHeat,
                outdoor: None,
            }),
        }
    }

    /// Current status.
    pub fn status(&self) -> HeatDemandStatus {
        lock(&self.state).status
    }

    /// Outdoor temperature seen on the last tick.
    pub fn last_outdoor(&self) -> Option<f64> {
        lock(&self.state).outdoor
    }

    /// Read the outdoor sensor and update the status.
    pub async fn tick(&self) -> HeatDemandStatus {
        let sensor = &self.config.outdoor_sensor;
        let outdoor = match self.cache.get(sensor.as_str()).await {
            Ok(value) => Some(value),
            Err(e) => {
                debug!("Heat demand has no outdoor temperature: {}", e);
                self.events.emit(HealthEvent::SensorPollFailure {
                    sensor: sensor.clone(),
                    critical: self.cache.is_critical(sensor.as_str()),
                });
                None
            }
        };

        let mut state = lock(&self.state);
        let previous = state.status;
        let next = match outdoor {
            Some(t) => next_status(previous, t, self.config.target, self.config.hysteresis),
            None => HeatDemandStatus::Error,
        };
        state.status = next;
        state.outdoor = outdoor;

        if next != previous {
            info!("Heat demand changed: {} -> {}", previous, next);
        }
        next
    }

    /// Human-readable status.
    pub fn format_status(&self) -> String {
        let state = lock(&self.state);
        format!(
            "Heat demand: {}\nOutdoor: {} (no heat above {:.1}°C, heat again below {:.1}°C)",
            state.status,
            format_temperature(state.outdoor),
            self.config.target,
            self.config.target - self.config.hysteresis
        )
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use boilerroom_types::DeviceAddress;

    use super::*;
    use crate::cache::SensorSpec;
    use crate::events::health_channel;
    use crate::mock::MockBus;
    use crate::transport::{FieldTransport, TransportOptions};

    const OUTDOOR: DeviceAddress = DeviceAddress::new(1, 0);

    // --- Pure hysteresis ---

    #[test]
    fn test_below_band_needs_heat() {
        let status = next_status(HeatDemandStatus::NoNeedHeat, 13.9, 16.0, 2.0);
        assert_eq!(status, HeatDemandStatus::NeedHeat);
    }

    #[test]
    fn test_above_target_no_heat() {
        let status = next_status(HeatDemandStatus::NeedHeat, 16.1, 16.0, 2.0);
        assert_eq!(status, HeatDemandStatus::NoNeedHeat);
    }

    #[test]
    fn test_inside_band_keeps_status() {
        assert_eq!(
            next_status(HeatDemandStatus::NeedHeat, 15.0, 16.0, 2.0),
            HeatDemandStatus::NeedHeat
        );
        assert_eq!(
            next_status(HeatDemandStatus::NoNeedHeat, 15.0, 16.0, 2.0),
            HeatDemandStatus::NoNeedHeat
        );
        // Band edges are inclusive
        assert_eq!(
            next_status(HeatDemandStatus::NoNeedHeat, 14.0, 16.0, 2.0),
            HeatDemandStatus::NoNeedHeat
        );
        assert_eq!(
            next_status(HeatDemandStatus::NeedHeat, 16.0, 16.0, 2.0),
            HeatDemandStatus::NeedHeat
        );
    }

    #[test]
    fn test_error_inside_band_resolves_to_need_heat() {
        assert_eq!(
            next_status(HeatDemandStatus::Error, 15.0, 16.0, 2.0),
            HeatDemandStatus::NeedHeat
        );
    }

    #[test]
    fn test_config_validation() {
        assert!(HeatDemandConfig::default().validate().is_ok());
        let config = HeatDemandConfig {
            hysteresis: -1.0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    // --- Controller ---

    fn controller(bus: &MockBus) -> (HeatDemandController, crate::events::HealthReceiver) {
        let transport = FieldTransport::spawn(bus.clone(), TransportOptions::default());
        let cache = Arc::new(
            SensorCache::new(transport, Duration::from_secs(1))
                .with_sensor("outdoor", SensorSpec::new(OUTDOOR)),
        );
        let (events, rx) = health_channel(16);
        (
            HeatDemandController::new(HeatDemandConfig::default(), cache, events),
            rx,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_tick_follows_outdoor_temperature() {
        let bus = MockBus::new();
        let (controller, _rx) = controller(&bus);
        assert_eq!(controller.status(), HeatDemandStatus::NeedHeat);

        bus.set_temperature(OUTDOOR, 18.0);
        assert_eq!(controller.tick().await, HeatDemandStatus::NoNeedHeat);

        bus.set_temperature(OUTDOOR, 15.0);
        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(controller.tick().await, HeatDemandStatus::NoNeedHeat);

        bus.set_temperature(OUTDOOR, 12.0);
        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(controller.tick().await, HeatDemandStatus::NeedHeat);
        assert_eq!(controller.last_outdoor(), Some(12.0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sensor_failure_is_error_and_event() {
        let bus = MockBus::new();
        bus.set_should_fail(true);
        let (controller, mut rx) = controller(&bus);

        let status = controller.tick().await;
        assert_eq!(status, HeatDemandStatus::Error);
        assert!(status.requires_heat());
        assert!(matches!(
            rx.try_recv().unwrap(),
            HealthEvent::SensorPollFailure { .. }
        ));
        assert!(controller.format_status().contains("n/a"));
    }
}
