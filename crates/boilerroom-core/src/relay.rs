//! Boiler relay management.
//!
//! The gate drives the boiler enable coil from heat demand. A new ignition
//! is only allowed while the boiler return is below the return curve target,
//! so a burner that just stopped is not restarted into warm water. A relay
//! that is already on stays on for as long as heat is needed. A manual
//! override replaces the automatic decision until released.

use std::sync::{Arc, Mutex};

use tracing::{debug, info, warn};

use boilerroom_types::{DeviceAddress, HeatDemandStatus, RelayOverride, SensorId};

use crate::cache::SensorCache;
use crate::curve::ClimateCurve;
use crate::events::{HealthEvent, HealthEvents};
use crate::transport::FieldTransport;
use crate::util::{format_temperature, lock};

/// Why the gate chose a relay state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateReason {
    /// Manual override.
    Override,
    /// Heat demand says no heat is needed.
    NoDemand,
    /// Burner already enabled and heat still needed.
    Running,
    /// Return water cold enough to ignite.
    ReturnCold,
    /// Return water still too warm to ignite.
    ReturnWarm,
    /// Return temperature unknown; heating wins.
    ReturnUnknown,
}

impl GateReason {
    fn describe(self) -> &'static str {
        match self {
            GateReason::Override => "manual override",
            GateReason::NoDemand => "no heat demand",
            GateReason::Running => "burner enabled, heat still needed",
            GateReason::ReturnCold => "return below minimum, ignition allowed",
            GateReason::ReturnWarm => "return still warm, ignition delayed",
            GateReason::ReturnUnknown => "return unknown, heating anyway",
        }
    }
}

/// Desired relay state.
pub fn decide(
    mode: RelayOverride,
    demand: HeatDemandStatus,
    relay_on: bool,
    return_temp: Option<f64>,
    min_return: f64,
) -> (bool, GateReason) {
    match mode {
        RelayOverride::ForceOn => return (true, GateReason::Override),
        RelayOverride::ForceOff => return (false, GateReason::Override),
        RelayOverride::Auto => {}
    }
    if !demand.requires_heat() {
        return (false, GateReason::NoDemand);
    }
    if relay_on {
        return (true, GateReason::Running);
    }
    match return_temp {
        None => (true, GateReason::ReturnUnknown),
        Some(t) if t < min_return => (true, GateReason::ReturnCold),
        Some(_) => (false, GateReason::ReturnWarm),
    }
}

#[derive(Debug, Default)]
struct GateState {
    mode: RelayOverride,
    relay_on: Option<bool>,
    min_return: Option<f64>,
    return_temp: Option<f64>,
    reason: Option<GateReason>,
}

/// Periodic boiler relay controller.
pub struct BoilerRelayGate {
    relay: DeviceAddress,
    return_sensor: SensorId,
    outdoor_sensor: SensorId,
    return_curve: ClimateCurve,
    transport: FieldTransport,
    cache: Arc<SensorCache>,
    events: HealthEvents,
    state: Mutex<GateState>,
    // Serializes ticks from the scheduler and from operator overrides.
    ticking: tokio::sync::Mutex<()>,
}

impl BoilerRelayGate {
    /// Create a gate in automatic mode.
    pub fn new(
        relay: DeviceAddress,
        return_sensor: SensorId,
        outdoor_sensor: SensorId,
        return_curve: ClimateCurve,
        transport: FieldTransport,
        cache: Arc<SensorCache>,
        events: HealthEvents,
    ) -> Self {
        Self {
            relay,
            return_sensor,
            outdoor_sensor,
            return_curve,
            transport,
            cache,
            events,
            state: Mutex::new(GateState::default()),
            ticking: tokio::sync::Mutex::new(()),
        }
    }

    /// Current override mode.
    pub fn mode(&self) -> RelayOverride {
        lock(&self.state).mode
    }

    /// Change the override mode. Takes effect on the next tick.
    pub fn set_mode(&self, mode: RelayOverride) {
        let mut state = lock(&self.state);
        if state.mode != mode {
            info!("Boiler relay mode: {} -> {}", state.mode, mode);
        }
        state.mode = mode;
    }

    /// Relay state seen or written on the last tick.
    pub fn relay_on(&self) -> Option<bool> {
        lock(&self.state).relay_on
    }

    /// Drive the relay for the given heat demand. Returns the relay state
    /// after the tick, or `None` when it could not be determined.
    ///
    /// Concurrent calls run one after another, so the last caller's mode
    /// is the one left on the coil.
    pub async fn tick(&self, demand: HeatDemandStatus) -> Option<bool> {
        let _ticking = self.ticking.lock().await;
        self.tick_locked(demand).await
    }

    async fn tick_locked(&self, demand: HeatDemandStatus) -> Option<bool> {
        let current = match self.transport.read_coil(self.relay).await {
            Ok(on) => on,
            Err(e) => {
                warn!("Cannot read boiler relay {}: {}", self.relay, e);
                self.events.emit(HealthEvent::BusPollFailure);
                lock(&self.state).relay_on = None;
                return None;
            }
        };

        let mode = self.mode();
        let outdoor = self.cache.get(self.outdoor_sensor.as_str()).await.ok();
        let min_return = self.return_curve.target_or_default(outdoor);

        // Return only matters when deciding about a new ignition
        let return_temp = if mode == RelayOverride::Auto && demand.requires_heat() && !current {
            match self.cache.get(self.return_sensor.as_str()).await {
                Ok(t) => Some(t),
                Err(e) => {
                    debug!("Boiler return unavailable for ignition gating: {}", e);
                    self.events.emit(HealthEvent::SensorPollFailure {
                        sensor: self.return_sensor.clone(),
                        critical: self.cache.is_critical(self.return_sensor.as_str()),
                    });
                    None
                }
            }
        } else {
            None
        };

        let (desired, reason) = decide(mode, demand, current, return_temp, min_return);
        {
            let mut state = lock(&self.state);
            state.min_return = Some(min_return);
            state.return_temp = return_temp;
            state.reason = Some(reason);
            state.relay_on = Some(current);
        }

        if desired == current {
            return Some(current);
        }

        match self
            .transport
            .write_coil(self.relay.bus_address, self.relay.index, desired)
            .await
        {
            Ok(()) => {
                info!(
                    "Boiler relay {} ({})",
                    if desired { "on" } else { "off" },
                    reason.describe()
                );
                lock(&self.state).relay_on = Some(desired);
                Some(desired)
            }
            Err(e) => {
                warn!("Failed to switch boiler relay: {}", e);
                self.events.emit(HealthEvent::BoilerRelayFailure);
                Some(current)
            }
        }
    }

    /// Human-readable status.
    pub fn format_status(&self) -> String {
        let state = lock(&self.state);
        let relay = match state.relay_on {
            Some(true) => "on",
            Some(false) => "off",
            None => "unknown",
        };
        let mut text = format!("Boiler relay: {} (mode: {})", relay, state.mode);
        if let Some(reason) = state.reason {
            text.push_str(&format!("\nReason: {}", reason.describe()));
        }
        if let Some(min_return) = state.min_return {
            text.push_str(&format!(
                "\nIgnition below return {:.1}°C, last return {}",
                min_return,
                format_temperature(state.return_temp)
            ));
        }
        text
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::cache::SensorSpec;
    use crate::events::{HealthReceiver, health_channel};
    use crate::mock::MockBus;
    use crate::transport::TransportOptions;

    // --- Decision table ---

    #[test]
    fn test_override_wins() {
        let (on, reason) = decide(
            RelayOverride::ForceOn,
            HeatDemandStatus::NoNeedHeat,
            false,
            Some(60.0),
            40.0,
        );
        assert!(on);
        assert_eq!(reason, GateReason::Override);
        let (on, _) = decide(
            RelayOverride::ForceOff,
            HeatDemandStatus::NeedHeat,
            true,
            Some(20.0),
            40.0,
        );
        assert!(!on);
    }

    #[test]
    fn test_no_demand_switches_off() {
        let (on, reason) = decide(
            RelayOverride::Auto,
            HeatDemandStatus::NoNeedHeat,
            true,
            None,
            40.0,
        );
        assert!(!on);
        assert_eq!(reason, GateReason::NoDemand);
    }

    #[test]
    fn test_error_demand_counts_as_heat() {
        let (on, _) = decide(RelayOverride::Auto, HeatDemandStatus::Error, false, Some(20.0), 40.0);
        assert!(on);
    }

    #[test]
    fn test_ignition_gated_by_return() {
        let (on, reason) = decide(
            RelayOverride::Auto,
            HeatDemandStatus::NeedHeat,
            false,
            Some(45.0),
            40.0,
        );
        assert!(!on);
        assert_eq!(reason, GateReason::ReturnWarm);

        let (on, reason) = decide(
            RelayOverride::Auto,
            HeatDemandStatus::NeedHeat,
            false,
            Some(35.0),
            40.0,
        );
        assert!(on);
        assert_eq!(reason, GateReason::ReturnCold);

        let (on, reason) = decide(
            RelayOverride::Auto,
            HeatDemandStatus::NeedHeat,
            false,
            None,
            40.0,
        );
        assert!(on);
        assert_eq!(reason, GateReason::ReturnUnknown);
    }

    #[test]
    fn test_running_burner_stays_on() {
        let (on, reason) = decide(
            RelayOverride::Auto,
            HeatDemandStatus::NeedHeat,
            true,
            Some(60.0),
            40.0,
        );
        assert!(on);
        assert_eq!(reason, GateReason::Running);
    }

    // --- Gate ---

    const RELAY: DeviceAddress = DeviceAddress::new(2, 0);
    const RETURN: DeviceAddress = DeviceAddress::new(1, 2);
    const OUTDOOR: DeviceAddress = DeviceAddress::new(1, 0);

    fn gate() -> (MockBus, BoilerRelayGate, HealthReceiver) {
        let bus = MockBus::new();
        let transport = FieldTransport::spawn(bus.clone(), TransportOptions::default());
        let cache = Arc::new(
            SensorCache::new(transport.clone(), Duration::from_millis(500))
                .with_sensor("boiler_return", SensorSpec::new(RETURN).critical(true))
                .with_sensor("outdoor", SensorSpec::new(OUTDOOR)),
        );
        let (events, rx) = health_channel(16);
        let gate = BoilerRelayGate::new(
            RELAY,
            SensorId::from("boiler_return"),
            SensorId::from("outdoor"),
            ClimateCurve::new(-20.0, 10.0, 50.0, 35.0),
            transport,
            cache,
            events,
        );
        bus.set_temperature(OUTDOOR, 10.0); // minimum return 35
        (bus, gate, rx)
    }

    #[tokio::test(start_paused = true)]
    async fn test_ignites_when_return_cold() {
        let (bus, gate, _rx) = gate();
        bus.set_temperature(RETURN, 30.0);

        assert_eq!(gate.tick(HeatDemandStatus::NeedHeat).await, Some(true));
        assert!(bus.coil(RELAY));
        assert!(gate.format_status().contains("Boiler relay: on (mode: automatic)"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_waits_while_return_warm() {
        let (bus, gate, _rx) = gate();
        bus.set_temperature(RETURN, 40.0);

        assert_eq!(gate.tick(HeatDemandStatus::NeedHeat).await, Some(false));
        assert_eq!(bus.write_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_switches_off_without_demand() {
        let (bus, gate, _rx) = gate();
        bus.set_coil(RELAY, true);

        assert_eq!(gate.tick(HeatDemandStatus::NoNeedHeat).await, Some(false));
        assert!(!bus.coil(RELAY));
    }

    #[tokio::test(start_paused = true)]
    async fn test_override_applies_on_next_tick() {
        let (bus, gate, _rx) = gate();
        gate.set_mode(RelayOverride::ForceOn);
        assert_eq!(gate.tick(HeatDemandStatus::NoNeedHeat).await, Some(true));
        assert!(bus.coil(RELAY));

        gate.set_mode(RelayOverride::Auto);
        assert_eq!(gate.tick(HeatDemandStatus::NoNeedHeat).await, Some(false));
    }

    #[tokio::test(start_paused = true)]
    async fn test_override_waits_for_running_tick() {
        let (bus, gate, _rx) = gate();
        let gate = Arc::new(gate);
        bus.set_temperature(RETURN, 30.0);
        bus.set_latency(Duration::from_millis(20));

        let scheduled = tokio::spawn({
            let gate = gate.clone();
            async move { gate.tick(HeatDemandStatus::NeedHeat).await }
        });
        tokio::time::sleep(Duration::from_millis(100)).await;

        gate.set_mode(RelayOverride::ForceOff);
        assert_eq!(gate.tick(HeatDemandStatus::NeedHeat).await, Some(false));
        scheduled.await.unwrap();

        assert!(!bus.coil(RELAY));
        assert_eq!(gate.relay_on(), Some(false));
        assert!(gate.format_status().contains("off (mode: forced off)"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_relay_write_failure_emits_event() {
        let (bus, gate, mut rx) = gate();
        bus.set_temperature(RETURN, 30.0);
        bus.set_writes_should_fail(true);

        assert_eq!(gate.tick(HeatDemandStatus::NeedHeat).await, Some(false));
        assert_eq!(rx.try_recv().unwrap(), HealthEvent::BoilerRelayFailure);
        assert!(!bus.coil(RELAY));
    }

    #[tokio::test(start_paused = true)]
    async fn test_relay_read_failure_emits_poll_event() {
        let (bus, gate, mut rx) = gate();
        bus.set_unit_offline(2, true);

        assert_eq!(gate.tick(HeatDemandStatus::NeedHeat).await, None);
        assert_eq!(rx.try_recv().unwrap(), HealthEvent::BusPollFailure);
        assert!(gate.format_status().contains("unknown"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unreadable_return_emits_sensor_event_and_heats() {
        let (bus, gate, mut rx) = gate();
        bus.set_unit_offline(1, true);

        assert_eq!(gate.tick(HeatDemandStatus::NeedHeat).await, Some(true));
        assert!(matches!(
            rx.try_recv().unwrap(),
            HealthEvent::SensorPollFailure { critical: true, .. }
        ));
    }
}
