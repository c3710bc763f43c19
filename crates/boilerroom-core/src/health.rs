//! Health aggregation and tier-change notifications.
//!
//! Once per monitoring tick the aggregator drains everything queued on the
//! health channel, reduces it to a [`HealthStatus`] and notifies the
//! operator when the tier differs from the previous tick. The drained
//! events form the tick's window; nothing carries over to the next tick.
//!
//! | Window contains | Status |
//! |-----------------|--------|
//! | any emergency event | `Emergency` |
//! | only minor events | `MinorProblems` |
//! | nothing | `Ok` |

use std::sync::{Arc, Mutex};

use time::OffsetDateTime;
use tracing::{debug, info, warn};

use boilerroom_types::HealthStatus;

use crate::events::{HealthEvent, HealthReceiver, Severity};
use crate::notify::Notifier;
use crate::util::lock;

/// Reduce a window of events to a status.
pub fn evaluate(events: &[HealthEvent]) -> HealthStatus {
    match events.iter().map(HealthEvent::severity).max() {
        Some(Severity::Emergency) => HealthStatus::Emergency,
        Some(Severity::Minor) => HealthStatus::MinorProblems,
        None => HealthStatus::Ok,
    }
}

/// Distinct problem descriptions, most severe first.
fn categories(events: &[HealthEvent]) -> Vec<String> {
    let mut ordered: Vec<&HealthEvent> = events.iter().collect();
    ordered.sort_by_key(|e| std::cmp::Reverse(e.severity()));

    let mut seen = Vec::new();
    for event in ordered {
        let text = event.describe();
        if !seen.contains(&text) {
            seen.push(text);
        }
    }
    seen
}

/// Notification text for a new status.
pub fn format_notification(status: HealthStatus, events: &[HealthEvent]) -> String {
    match status {
        HealthStatus::Ok => "Plant health restored: all systems normal.".to_string(),
        HealthStatus::MinorProblems => {
            format!("Plant has minor problems: {}.", categories(events).join(", "))
        }
        HealthStatus::Emergency => {
            format!("EMERGENCY in the plant: {}!", categories(events).join(", "))
        }
    }
}

#[derive(Debug, Default)]
struct HealthState {
    status: HealthStatus,
    last_window: Vec<HealthEvent>,
    last_tick: Option<OffsetDateTime>,
    notifications: u64,
}

/// Single consumer of the health channel.
pub struct HealthAggregator {
    receiver: Mutex<HealthReceiver>,
    notifier: Arc<dyn Notifier>,
    state: Mutex<HealthState>,
}

impl HealthAggregator {
    /// Create an aggregator starting at `Ok`.
    pub fn new(receiver: HealthReceiver, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            receiver: Mutex::new(receiver),
            notifier,
            state: Mutex::new(HealthState::default()),
        }
    }

    /// Status computed on the last tick.
    pub fn status(&self) -> HealthStatus {
        lock(&self.state).status
    }

    /// Events of the last tick's window.
    pub fn last_window(&self) -> Vec<HealthEvent> {
        lock(&self.state).last_window.clone()
    }

    fn drain(&self) -> Vec<HealthEvent> {
        let mut receiver = lock(&self.receiver);
        let mut window = Vec::new();
        while let Ok(event) = receiver.try_recv() {
            window.push(event);
        }
        window
    }

    /// Drain the window, update the status and notify on change.
    pub async fn tick(&self) -> HealthStatus {
        let window = self.drain();
        let status = evaluate(&window);

        let previous = {
            let mut state = lock(&self.state);
            let previous = state.status;
            state.status = status;
            state.last_window = window.clone();
            state.last_tick = Some(OffsetDateTime::now_utc());
            previous
        };

        if status == previous {
            debug!("Health: {} ({} events)", status, window.len());
            return status;
        }

        let message = format_notification(status, &window);
        match status {
            HealthStatus::Ok => info!("Health changed: {} -> {}", previous, status),
            _ => warn!("Health changed: {} -> {}: {}", previous, status, message),
        }
        self.notifier.notify(&message).await;
        lock(&self.state).notifications += 1;
        status
    }

    /// Human-readable status.
    pub fn format_status(&self) -> String {
        let state = lock(&self.state);
        let mut text = format!("Health: {}", state.status);
        if !state.last_window.is_empty() {
            text.push_str(&format!(
                "\nReported problems: {}",
                categories(&state.last_window).join(", ")
            ));
        }
        match state.last_tick {
            Some(ts) => text.push_str(&format!(
                "\nLast check: {:02}:{:02}:{:02} UTC",
                ts.hour(),
                ts.minute(),
                ts.second()
            )),
            None => text.push_str("\nLast check: never"),
        }
        text.push_str(&format!("\nNotifications sent: {}", state.notifications));
        text
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::health_channel;
    use crate::notify::MemoryNotifier;
    use boilerroom_types::SensorId;

    fn minor() -> HealthEvent {
        HealthEvent::SensorPollFailure {
            sensor: SensorId::from("bathroom"),
            critical: false,
        }
    }

    // --- Evaluation ---

    #[test]
    fn test_empty_window_is_ok() {
        assert_eq!(evaluate(&[]), HealthStatus::Ok);
    }

    #[test]
    fn test_minor_only() {
        let events = vec![
            minor(),
            HealthEvent::AncillaryRelayFailure {
                relay: "trace_heating".into(),
            },
        ];
        assert_eq!(evaluate(&events), HealthStatus::MinorProblems);
    }

    #[test]
    fn test_emergency_wins_over_minor() {
        let events = vec![minor(), HealthEvent::ValveCalculationFailure, minor()];
        assert_eq!(evaluate(&events), HealthStatus::Emergency);
    }

    #[test]
    fn test_bus_write_failure_is_emergency() {
        assert_eq!(
            evaluate(&[HealthEvent::BusWriteFailure]),
            HealthStatus::Emergency
        );
    }

    #[test]
    fn test_notification_lists_distinct_categories() {
        let events = vec![minor(), HealthEvent::BusPollFailure, minor()];
        let text = format_notification(HealthStatus::Emergency, &events);
        assert_eq!(
            text,
            "EMERGENCY in the plant: field bus polling failed, sensor bathroom unavailable!"
        );
    }

    // --- Aggregator ---

    #[tokio::test]
    async fn test_notifies_only_on_change() {
        let (events, rx) = health_channel(16);
        let notifier = MemoryNotifier::new();
        let aggregator = HealthAggregator::new(rx, Arc::new(notifier.clone()));

        // Ok -> Ok: silent
        assert_eq!(aggregator.tick().await, HealthStatus::Ok);
        assert!(notifier.messages().is_empty());

        events.emit(minor());
        assert_eq!(aggregator.tick().await, HealthStatus::MinorProblems);
        events.emit(minor());
        assert_eq!(aggregator.tick().await, HealthStatus::MinorProblems);
        assert_eq!(notifier.messages().len(), 1);

        events.emit(minor());
        events.emit(HealthEvent::BoilerRelayFailure);
        assert_eq!(aggregator.tick().await, HealthStatus::Emergency);

        assert_eq!(aggregator.tick().await, HealthStatus::Ok);
        let messages = notifier.messages();
        assert_eq!(messages.len(), 3);
        assert!(messages[1].starts_with("EMERGENCY"));
        assert_eq!(messages[2], "Plant health restored: all systems normal.");
    }

    #[tokio::test]
    async fn test_window_empty_after_every_tick() {
        let (events, rx) = health_channel(16);
        let aggregator = HealthAggregator::new(rx, Arc::new(MemoryNotifier::new()));

        events.emit(HealthEvent::BusPollFailure);
        events.emit(minor());
        aggregator.tick().await;
        assert_eq!(aggregator.last_window().len(), 2);

        aggregator.tick().await;
        assert!(aggregator.last_window().is_empty());
        assert_eq!(aggregator.status(), HealthStatus::Ok);
    }

    #[tokio::test]
    async fn test_format_status() {
        let (events, rx) = health_channel(16);
        let aggregator = HealthAggregator::new(rx, Arc::new(MemoryNotifier::new()));
        assert!(aggregator.format_status().contains("Last check: never"));

        events.emit(HealthEvent::LowTemperatureAlarm {
            sensor: SensorId::from("garage"),
        });
        aggregator.tick().await;
        let text = aggregator.format_status();
        assert!(text.starts_with("Health: emergency"));
        assert!(text.contains("low temperature at garage"));
        assert!(text.contains("Notifications sent: 1"));
    }
}
