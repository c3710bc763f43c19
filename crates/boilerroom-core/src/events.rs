//! Health events raised by the control loops.
//!
//! Every periodic task reports problems as [`HealthEvent`]s instead of
//! failing. Producers hold a cloned [`HealthEvents`] handle and never block:
//! the channel is bounded and an event that does not fit is logged and
//! dropped. The health aggregator is the only consumer.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{trace, warn};

use boilerroom_types::SensorId;

/// Something went wrong somewhere in the plant.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new event types
/// in future versions without breaking downstream code.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
#[non_exhaustive]
pub enum HealthEvent {
    /// Reading coils or discrete inputs failed.
    BusPollFailure,
    /// Writing a coil or register failed.
    BusWriteFailure,
    /// A sensor could not be read.
    SensorPollFailure { sensor: SensorId, critical: bool },
    /// The valve tick could not compute or complete a move.
    ValveCalculationFailure,
    /// A monitored temperature fell below its alarm threshold.
    LowTemperatureAlarm { sensor: SensorId },
    /// The boiler relay could not be switched.
    BoilerRelayFailure,
    /// A relay of an auxiliary controller could not be switched.
    AncillaryRelayFailure { relay: String },
}

/// How bad an event is for the plant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Severity {
    /// Degraded, but the plant keeps heating.
    Minor,
    /// Heating or safety is at risk.
    Emergency,
}

impl HealthEvent {
    /// Severity class of the event.
    pub fn severity(&self) -> Severity {
        match self {
            HealthEvent::SensorPollFailure { critical: false, .. }
            | HealthEvent::AncillaryRelayFailure { .. } => Severity::Minor,
            HealthEvent::BusPollFailure
            | HealthEvent::BusWriteFailure
            | HealthEvent::SensorPollFailure { critical: true, .. }
            | HealthEvent::ValveCalculationFailure
            | HealthEvent::LowTemperatureAlarm { .. }
            | HealthEvent::BoilerRelayFailure => Severity::Emergency,
        }
    }

    /// Short description used in notifications.
    pub fn describe(&self) -> String {
        match self {
            HealthEvent::BusPollFailure => "field bus polling failed".to_string(),
            HealthEvent::BusWriteFailure => "field bus write failed".to_string(),
            HealthEvent::SensorPollFailure { sensor, critical } => {
                if *critical {
                    format!("critical sensor {} unavailable", sensor)
                } else {
                    format!("sensor {} unavailable", sensor)
                }
            }
            HealthEvent::ValveCalculationFailure => "mixing valve control failed".to_string(),
            HealthEvent::LowTemperatureAlarm { sensor } => {
                format!("low temperature at {}", sensor)
            }
            HealthEvent::BoilerRelayFailure => "boiler relay could not be switched".to_string(),
            HealthEvent::AncillaryRelayFailure { relay } => {
                format!("relay {} could not be switched", relay)
            }
        }
    }
}

/// Receiving half of the health channel.
pub type HealthReceiver = mpsc::Receiver<HealthEvent>;

/// Non-blocking producer handle for health events.
#[derive(Debug, Clone)]
pub struct HealthEvents {
    sender: mpsc::Sender<HealthEvent>,
}

impl HealthEvents {
    /// Queue an event. Never waits; a full or closed channel drops the event.
    pub fn emit(&self, event: HealthEvent) {
        trace!("Health event: {:?}", event);
        match self.sender.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(event)) => {
                warn!("Health queue full, dropping {:?}", event);
            }
            Err(mpsc::error::TrySendError::Closed(event)) => {
                warn!("Health aggregator gone, dropping {:?}", event);
            }
        }
    }
}

/// Create a health channel with the given capacity.
pub fn health_channel(capacity: usize) -> (HealthEvents, HealthReceiver) {
    let (sender, receiver) = mpsc::channel(capacity.max(1));
    (HealthEvents { sender }, receiver)
}

/// Create a default health channel with capacity 256.
pub fn default_health_channel() -> (HealthEvents, HealthReceiver) {
    health_channel(256)
}
