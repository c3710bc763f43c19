//! Low temperature alarms.
//!
//! Each rule watches one sensor against a minimum. While a reading stays
//! below its minimum a [`HealthEvent::LowTemperatureAlarm`] is raised on
//! every tick, so the health tier stays at `Emergency` until it recovers.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use boilerroom_types::SensorId;

use crate::cache::SensorCache;
use crate::events::{HealthEvent, HealthEvents};
use crate::util::lock;

/// Alarm threshold for one sensor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlarmRule {
    /// Watched sensor.
    pub sensor: SensorId,
    /// Alarm below this temperature.
    pub min: f64,
}

/// State of one rule after a tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AlarmState {
    /// Reading at or above the minimum.
    Normal(f64),
    /// Reading below the minimum.
    Alarm(f64),
    /// Sensor could not be read.
    Unavailable,
}

/// Evaluates all alarm rules.
pub struct TemperatureAlarms {
    rules: Vec<AlarmRule>,
    cache: Arc<SensorCache>,
    events: HealthEvents,
    states: Mutex<BTreeMap<SensorId, AlarmState>>,
}

impl TemperatureAlarms {
    /// Create an evaluator.
    pub fn new(rules: Vec<AlarmRule>, cache: Arc<SensorCache>, events: HealthEvents) -> Self {
        Self {
            rules,
            cache,
            events,
            states: Mutex::new(BTreeMap::new()),
        }
    }

    /// Configured rules.
    pub fn rules(&self) -> &[AlarmRule] {
        &self.rules
    }

    /// Check every rule. Returns the sensors currently in alarm.
    pub async fn tick(&self) -> Vec<SensorId> {
        let mut alarming = Vec::new();
        for rule in &self.rules {
            let state = match self.cache.get(rule.sensor.as_str()).await {
                Ok(t) if t < rule.min => {
                    self.events.emit(HealthEvent::LowTemperatureAlarm {
                        sensor: rule.sensor.clone(),
                    });
                    alarming.push(rule.sensor.clone());
                    AlarmState::Alarm(t)
                }
                Ok(t) => AlarmState::Normal(t),
                Err(_) => {
                    self.events.emit(HealthEvent::SensorPollFailure {
                        sensor: rule.sensor.clone(),
                        critical: self.cache.is_critical(rule.sensor.as_str()),
                    });
                    AlarmState::Unavailable
                }
            };

            let previous = lock(&self.states).insert(rule.sensor.clone(), state);
            match (previous, state) {
                (Some(AlarmState::Alarm(_)), AlarmState::Alarm(_)) => {}
                (_, AlarmState::Alarm(t)) => {
                    warn!("{} is at {:.1}°C, below {:.1}°C", rule.sensor, t, rule.min)
                }
                (Some(AlarmState::Alarm(_)), AlarmState::Normal(t)) => {
                    info!("{} recovered to {:.1}°C", rule.sensor, t)
                }
                _ => {}
            }
        }
        alarming
    }

    /// Human-readable status.
    pub fn format_status(&self) -> String {
        let states = lock(&self.states);
        if self.rules.is_empty() {
            return "Temperature alarms: none configured".to_string();
        }
        let mut text = String::from("Temperature alarms:");
        for rule in &self.rules {
            let line = match states.get(&rule.sensor) {
                Some(AlarmState::Alarm(t)) => format!("ALARM {:.1}°C (min {:.1}°C)", t, rule.min),
                Some(AlarmState::Normal(t)) => format!("ok {:.1}°C (min {:.1}°C)", t, rule.min),
                Some(AlarmState::Unavailable) => "unavailable".to_string(),
                None => "not checked yet".to_string(),
            };
            text.push_str(&format!("\n  {}: {}", rule.sensor, line));
        }
        text
    }
}
