//! End-to-end control cycle over a mock bus.
//!
//! Wires every component the way the service does and walks the plant
//! through a cold start, a burner run with a valve move, a sensor board
//! outage and the recovery from it.

use std::sync::Arc;
use std::time::Duration;

use boilerroom_core::{
    BoilerConfig, BoilerEstimator, BoilerRelayGate, BusOp, ClimateCurve, FieldTransport,
    HealthAggregator, HeatDemandConfig, HeatDemandController, History, HistoryConfig,
    MemoryNotifier, MockBus, SensorCache, SensorSpec, TransportOptions, ValveConfig,
    ValveController, ValveOutcome, health_channel,
};
use boilerroom_types::{BoilerStatus, DeviceAddress, HealthStatus, HeatDemandStatus};

const OUTDOOR: DeviceAddress = DeviceAddress::new(1, 0);
const SUPPLY: DeviceAddress = DeviceAddress::new(1, 1);
const RETURN: DeviceAddress = DeviceAddress::new(1, 2);
const FLOOR_SUPPLY: DeviceAddress = DeviceAddress::new(1, 3);
const FLOOR_RETURN: DeviceAddress = DeviceAddress::new(1, 4);
const LIVING_ROOM: DeviceAddress = DeviceAddress::new(1, 5);
const BOILER_RELAY: DeviceAddress = DeviceAddress::new(2, 0);
const VALVE_RELAY: DeviceAddress = DeviceAddress::new(2, 1);
const VALVE_VOLTAGE: DeviceAddress = DeviceAddress::new(3, 0);

struct Plant {
    bus: MockBus,
    demand: HeatDemandController,
    gate: BoilerRelayGate,
    boiler: BoilerEstimator,
    valve: ValveController,
    health: HealthAggregator,
    history: Arc<History>,
    notifier: MemoryNotifier,
}

fn plant() -> Plant {
    let bus = MockBus::new();
    let transport = FieldTransport::spawn(bus.clone(), TransportOptions::default());
    let cache = Arc::new(
        SensorCache::new(transport.clone(), Duration::from_millis(500))
            .with_sensor("outdoor", SensorSpec::new(OUTDOOR))
            .with_sensor("boiler_supply", SensorSpec::new(SUPPLY).critical(true))
            .with_sensor("boiler_return", SensorSpec::new(RETURN).critical(true))
            .with_sensor("floor_supply", SensorSpec::new(FLOOR_SUPPLY).critical(true))
            .with_sensor("floor_return", SensorSpec::new(FLOOR_RETURN))
            .with_sensor("living_room", SensorSpec::new(LIVING_ROOM)),
    );
    let (events, rx) = health_channel(64);
    let notifier = MemoryNotifier::new();
    let history = Arc::new(History::new(HistoryConfig::default()));

    let boiler_curve = ClimateCurve::new(-20.0, 10.0, 80.0, 50.0);
    let floor_curve = ClimateCurve::new(-20.0, 10.0, 45.0, 25.0);
    let return_curve = ClimateCurve::new(-20.0, 10.0, 45.0, 35.0);
    let boiler_config = BoilerConfig::default();

    Plant {
        demand: HeatDemandController::new(
            HeatDemandConfig::default(),
            cache.clone(),
            events.clone(),
        ),
        gate: BoilerRelayGate::new(
            boiler_config.relay,
            boiler_config.return_sensor.clone(),
            boiler_config.outdoor_sensor.clone(),
            return_curve,
            transport.clone(),
            cache.clone(),
            events.clone(),
        ),
        boiler: BoilerEstimator::new(
            boiler_config,
            boiler_curve,
            transport.clone(),
            cache.clone(),
            history.clone(),
            events.clone(),
        ),
        valve: ValveController::new(ValveConfig::default(), floor_curve, transport, cache, events),
        health: HealthAggregator::new(rx, Arc::new(notifier.clone())),
        history,
        notifier,
        bus,
    }
}

impl Plant {
    fn set_temperatures(&self, supply: f64, ret: f64) {
        self.bus.set_temperature(SUPPLY, supply);
        self.bus.set_temperature(RETURN, ret);
    }

    /// Let every cache slot expire.
    async fn next_minute(&self) {
        tokio::time::advance(Duration::from_secs(60)).await;
    }
}

#[tokio::test(start_paused = true)]
async fn test_cold_start_ignites_and_moves_valve() {
    let plant = plant();
    plant.bus.set_temperature(OUTDOOR, -5.0);
    plant.bus.set_temperature(LIVING_ROOM, 20.0);
    plant.bus.set_temperature(FLOOR_SUPPLY, 30.0);
    plant.bus.set_temperature(FLOOR_RETURN, 28.0);
    plant.bus.set_register(VALVE_VOLTAGE, 200);
    plant.set_temperatures(30.0, 30.0);

    // Cold outside, cold return: heat is needed and the burner may start
    assert_eq!(plant.demand.tick().await, HeatDemandStatus::NeedHeat);
    assert_eq!(plant.gate.tick(HeatDemandStatus::NeedHeat).await, Some(true));
    assert!(plant.bus.coil(BOILER_RELAY));

    plant.next_minute().await;
    plant.set_temperatures(50.0, 40.0);
    assert_eq!(plant.boiler.tick().await, BoilerStatus::Init);

    plant.next_minute().await;
    plant.set_temperatures(56.0, 44.0);
    assert_eq!(plant.boiler.tick().await, BoilerStatus::Works);
    assert_eq!(plant.history.status_len(), 2);

    // Floor target 35 + 2 * (21 - 20) = 37, opening (37 - 28) / (56 - 28) = 32%
    plant.bus.clear_ops();
    let outcome = plant.valve.tick(plant.boiler.status()).await;
    let ValveOutcome::Moved { from, to, travel } = outcome else {
        panic!("expected a valve move, got {:?}", outcome);
    };
    assert_eq!(from.percent(), 0);
    assert_eq!(to.percent(), 32);
    assert!((travel.as_secs_f64() - 43.4).abs() < 1e-6);
    assert_eq!(plant.bus.register(VALVE_VOLTAGE), 456);
    assert!(!plant.bus.coil(VALVE_RELAY));

    let writes: Vec<BusOp> = plant
        .bus
        .ops()
        .into_iter()
        .filter(BusOp::is_write)
        .collect();
    assert_eq!(writes.len(), 3);

    // Nothing went wrong, so the operator hears nothing
    assert_eq!(plant.health.tick().await, HealthStatus::Ok);
    assert!(plant.notifier.messages().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_sensor_board_outage_escalates_and_recovers() {
    let plant = plant();
    plant.bus.set_temperature(OUTDOOR, -5.0);
    plant.bus.set_temperature(LIVING_ROOM, 20.0);
    plant.bus.set_coil(BOILER_RELAY, true);
    plant.set_temperatures(50.0, 40.0);
    plant.boiler.tick().await;
    plant.health.tick().await;

    plant.bus.set_unit_offline(1, true);
    plant.next_minute().await;

    assert_eq!(plant.demand.tick().await, HeatDemandStatus::Error);
    assert_eq!(plant.boiler.tick().await, BoilerStatus::Error);
    assert_eq!(
        plant.valve.tick(plant.boiler.status()).await,
        ValveOutcome::BoilerNotWorking
    );

    assert_eq!(plant.health.tick().await, HealthStatus::Emergency);
    let alert = plant.notifier.last().unwrap();
    assert!(alert.starts_with("EMERGENCY in the plant:"));
    assert!(alert.contains("boiler_supply"));

    // The board comes back
    plant.bus.set_unit_offline(1, false);
    plant.next_minute().await;
    assert_eq!(plant.demand.tick().await, HeatDemandStatus::NeedHeat);
    assert_eq!(plant.boiler.tick().await, BoilerStatus::Init);

    assert_eq!(plant.health.tick().await, HealthStatus::Ok);
    assert_eq!(
        plant.notifier.last().unwrap(),
        "Plant health restored: all systems normal."
    );
    assert_eq!(plant.notifier.messages().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_warm_weather_keeps_burner_off() {
    let plant = plant();
    plant.bus.set_temperature(OUTDOOR, 19.0);
    plant.set_temperatures(45.0, 42.0);

    assert_eq!(plant.demand.tick().await, HeatDemandStatus::NoNeedHeat);
    assert_eq!(plant.gate.tick(plant.demand.status()).await, Some(false));
    assert_eq!(plant.boiler.tick().await, BoilerStatus::Idle);
    assert_eq!(
        plant.valve.tick(plant.boiler.status()).await,
        ValveOutcome::BoilerNotWorking
    );
    assert_eq!(plant.bus.write_count(), 0);
}
