//! Plant wiring and the operator command surface.
//!
//! [`Plant`] owns one instance of every control component, all sharing a
//! single [`FieldTransport`] and [`SensorCache`]. The scheduler drives the
//! components through [`Plant::tick`]; the HTTP API reads their formatted
//! status and applies manual overrides.

use std::fmt;
use std::sync::Arc;

use time::OffsetDateTime;
use tracing::info;

use boilerroom_core::{
    BoilerEstimator, BoilerRelayGate, BusConnector, FieldTransport, HealthAggregator,
    HeatDemandController, History, ModbusTcpConnector, Notifier, SensorCache, TemperatureAlarms,
    ValveController, ValveOutcome, health_channel,
};
use boilerroom_types::{BoilerStatus, HealthStatus, HeatDemandStatus, RelayOverride};

use crate::config::{Config, ScheduleConfig};

/// The periodic control loops.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ControlTask {
    /// Boiler relay management.
    Relay,
    /// Boiler status estimation.
    Boiler,
    /// Heat demand.
    HeatDemand,
    /// Mixing valve.
    Valve,
    /// Low temperature alarms.
    Alarms,
    /// Health aggregation.
    Health,
}

impl ControlTask {
    /// Every control loop, in start order.
    pub const ALL: [ControlTask; 6] = [
        ControlTask::HeatDemand,
        ControlTask::Relay,
        ControlTask::Boiler,
        ControlTask::Valve,
        ControlTask::Alarms,
        ControlTask::Health,
    ];

    /// Short name used in logs.
    pub fn name(self) -> &'static str {
        match self {
            ControlTask::Relay => "relay",
            ControlTask::Boiler => "boiler",
            ControlTask::HeatDemand => "heat-demand",
            ControlTask::Valve => "valve",
            ControlTask::Alarms => "alarms",
            ControlTask::Health => "health",
        }
    }

    /// Configured tick period in seconds.
    pub fn period_secs(self, schedule: &ScheduleConfig) -> u64 {
        match self {
            ControlTask::Relay => schedule.relay_secs,
            ControlTask::Boiler => schedule.boiler_secs,
            ControlTask::HeatDemand => schedule.heat_demand_secs,
            ControlTask::Valve => schedule.valve_secs,
            ControlTask::Alarms => schedule.alarms_secs,
            ControlTask::Health => schedule.health_secs,
        }
    }
}

impl fmt::Display for ControlTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A fully wired plant.
pub struct Plant {
    config: Config,
    transport: FieldTransport,
    history: Arc<History>,
    demand: HeatDemandController,
    gate: BoilerRelayGate,
    boiler: BoilerEstimator,
    valve: ValveController,
    alarms: TemperatureAlarms,
    health: HealthAggregator,
    started_at: OffsetDateTime,
}

impl Plant {
    /// Wire the plant over a Modbus TCP gateway.
    pub fn connect(config: Config, notifier: Arc<dyn Notifier>) -> Arc<Self> {
        let connector = ModbusTcpConnector::new(config.bus.endpoint());
        Self::build(config, connector, notifier)
    }

    /// Wire the plant over any bus connector.
    ///
    /// Must be called inside a tokio runtime; the transport worker is spawned here.
    pub fn build<C>(config: Config, connector: C, notifier: Arc<dyn Notifier>) -> Arc<Self>
    where
        C: BusConnector + 'static,
    {
        info!(
            "Wiring plant on {} ({} sensors, {} alarm rules)",
            connector.endpoint(),
            config.sensors.len(),
            config.alarms.rules.len()
        );

        let transport = FieldTransport::spawn(connector, config.bus.transport_options());
        let cache = SensorCache::new(transport.clone(), config.cache.ttl());
        let cache = Arc::new(
            config
                .sensor_specs()
                .fold(cache, |cache, (id, spec)| cache.with_sensor(id, spec)),
        );
        let (events, receiver) = health_channel(config.health.queue_capacity);
        let history = Arc::new(History::new(config.history.clone()));

        let demand =
            HeatDemandController::new(config.heat_demand.clone(), cache.clone(), events.clone());
        let gate = BoilerRelayGate::new(
            config.boiler.relay,
            config.boiler.return_sensor.clone(),
            config.boiler.outdoor_sensor.clone(),
            config.curves.return_,
            transport.clone(),
            cache.clone(),
            events.clone(),
        );
        let boiler = BoilerEstimator::new(
            config.boiler.clone(),
            config.curves.boiler,
            transport.clone(),
            cache.clone(),
            history.clone(),
            events.clone(),
        );
        let valve = ValveController::new(
            config.valve.clone(),
            config.curves.floor,
            transport.clone(),
            cache.clone(),
            events.clone(),
        );
        let alarms = TemperatureAlarms::new(config.alarms.rules.clone(), cache, events);
        let health = HealthAggregator::new(receiver, notifier);

        Arc::new(Self {
            config,
            transport,
            history,
            demand,
            gate,
            boiler,
            valve,
            alarms,
            health,
            started_at: OffsetDateTime::now_utc(),
        })
    }

    /// Configuration the plant was built from.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Shared field transport.
    pub fn transport(&self) -> &FieldTransport {
        &self.transport
    }

    /// Boiler history.
    pub fn history(&self) -> &History {
        &self.history
    }

    /// When the plant was wired.
    pub fn started_at(&self) -> OffsetDateTime {
        self.started_at
    }

    /// Current boiler status.
    pub fn boiler(&self) -> BoilerStatus {
        self.boiler.status()
    }

    /// Current heat demand.
    pub fn heat_demand(&self) -> HeatDemandStatus {
        self.demand.status()
    }

    /// Current plant health.
    pub fn health(&self) -> HealthStatus {
        self.health.status()
    }

    /// Boiler relay gate.
    pub fn relay(&self) -> &BoilerRelayGate {
        &self.gate
    }

    /// Mixing valve controller.
    pub fn valve(&self) -> &ValveController {
        &self.valve
    }

    /// Run one tick of a control loop. Returns `false` when the tick
    /// ended in a failure state.
    pub async fn tick(&self, task: ControlTask) -> bool {
        match task {
            ControlTask::Relay => self.gate.tick(self.demand.status()).await.is_some(),
            ControlTask::Boiler => self.boiler.tick().await != BoilerStatus::Error,
            ControlTask::HeatDemand => self.demand.tick().await != HeatDemandStatus::Error,
            ControlTask::Valve => {
                self.valve.tick(self.boiler.status()).await != ValveOutcome::Failed
            }
            ControlTask::Alarms => {
                self.alarms.tick().await;
                true
            }
            ControlTask::Health => {
                self.health.tick().await;
                true
            }
        }
    }

    // --- Command surface ---

    /// Boiler status text.
    pub fn boiler_status(&self) -> String {
        self.boiler.format_status()
    }

    /// Heat demand text.
    pub fn heat_demand_status(&self) -> String {
        self.demand.format_status()
    }

    /// Boiler relay text.
    pub fn relay_status(&self) -> String {
        self.gate.format_status()
    }

    /// Mixing valve text.
    pub fn valve_status(&self) -> String {
        self.valve.format_status()
    }

    /// Plant health text.
    pub fn health_status(&self) -> String {
        self.health.format_status()
    }

    /// Low temperature alarms text.
    pub fn alarms_status(&self) -> String {
        self.alarms.format_status()
    }

    /// Field bus text.
    pub fn transport_status(&self) -> String {
        self.transport.format_status()
    }

    /// Boiler activity over the retained history.
    pub fn summary(&self) -> String {
        self.history
            .format_last_day_summary(OffsetDateTime::now_utc())
    }

    /// Every status section, one after another.
    pub fn overview(&self) -> String {
        [
            self.health_status(),
            self.heat_demand_status(),
            self.relay_status(),
            self.boiler_status(),
            self.valve_status(),
            self.alarms_status(),
            self.transport_status(),
        ]
        .join("\n\n")
    }

    /// Apply a manual boiler relay override and drive the relay right away.
    /// Returns the resulting relay status.
    pub async fn set_boiler_override(&self, mode: RelayOverride) -> String {
        self.gate.set_mode(mode);
        self.gate.tick(self.demand.status()).await;
        self.gate.format_status()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use boilerroom_core::{MemoryNotifier, MockBus};
    use boilerroom_types::DeviceAddress;

    const OUTDOOR: DeviceAddress = DeviceAddress::new(1, 0);
    const BOILER_RELAY: DeviceAddress = DeviceAddress::new(2, 0);

    fn plant(bus: &MockBus) -> Arc<Plant> {
        Plant::build(
            Config::default(),
            bus.clone(),
            Arc::new(MemoryNotifier::new()),
        )
    }

    #[test]
    fn test_control_task_periods() {
        let schedule = ScheduleConfig::default();
        assert_eq!(ControlTask::Relay.period_secs(&schedule), 10);
        assert_eq!(ControlTask::Boiler.period_secs(&schedule), 30);
        assert_eq!(ControlTask::ALL.len(), 6);
        assert_eq!(ControlTask::HeatDemand.to_string(), "heat-demand");
    }

    #[tokio::test(start_paused = true)]
    async fn test_tick_reports_failures() {
        let bus = MockBus::new();
        bus.set_temperature(OUTDOOR, 5.0);
        let plant = plant(&bus);

        assert!(plant.tick(ControlTask::HeatDemand).await);
        assert_eq!(plant.heat_demand(), HeatDemandStatus::NeedHeat);

        bus.set_should_fail(true);
        tokio::time::advance(std::time::Duration::from_secs(10)).await;
        assert!(!plant.tick(ControlTask::HeatDemand).await);
        assert!(!plant.tick(ControlTask::Relay).await);
        assert!(!plant.tick(ControlTask::Boiler).await);
        // Valve and alarms have nothing to fail on while the boiler is in error
        assert!(plant.tick(ControlTask::Valve).await);
        assert!(plant.tick(ControlTask::Alarms).await);
        assert!(plant.tick(ControlTask::Health).await);
        assert_eq!(plant.health(), HealthStatus::Emergency);
    }

    #[tokio::test(start_paused = true)]
    async fn test_override_switches_relay_immediately() {
        let bus = MockBus::new();
        bus.set_temperature(OUTDOOR, 20.0);
        let plant = plant(&bus);
        plant.tick(ControlTask::HeatDemand).await;
        assert_eq!(plant.heat_demand(), HeatDemandStatus::NoNeedHeat);

        let text = plant.set_boiler_override(RelayOverride::ForceOn).await;
        assert!(bus.coil(BOILER_RELAY));
        assert!(text.contains("forced on"));

        let text = plant.set_boiler_override(RelayOverride::Auto).await;
        assert!(!bus.coil(BOILER_RELAY));
        assert!(text.contains("automatic"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_overview_contains_every_section() {
        let bus = MockBus::new();
        let plant = plant(&bus);
        let text = plant.overview();
        for heading in [
            "Health:",
            "Heat demand:",
            "Boiler relay:",
            "Boiler:",
            "Mixing valve:",
            "Temperature alarms",
            "Field bus",
        ] {
            assert!(text.contains(heading), "missing {heading}");
        }
        assert_eq!(plant.summary(), "No boiler history recorded yet.");
    }
}
