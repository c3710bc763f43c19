//! Config file to HTTP answers, with the control loops running on a mock bus.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

use boilerroom_core::{MemoryNotifier, MockBus};
use boilerroom_service::{Config, ConfigError, Plant, Scheduler, api};
use boilerroom_types::{DeviceAddress, HealthStatus};

const PLANT_TOML: &str = r#"
[bus]
host = "10.0.0.20"
settle_delay_ms = 20

[schedule]
relay_secs = 5
boiler_secs = 10
heat_demand_secs = 30
valve_secs = 30
alarms_secs = 30
health_secs = 30

[sensors.outdoor]
address = { bus_address = 1, index = 0 }

[sensors.boiler_supply]
address = { bus_address = 1, index = 1 }
critical = true

[sensors.boiler_return]
address = { bus_address = 1, index = 2 }
critical = true

[sensors.floor_supply]
address = { bus_address = 1, index = 3 }

[sensors.floor_return]
address = { bus_address = 1, index = 4 }

[sensors.living_room]
address = { bus_address = 1, index = 5 }

[sensors.garage]
address = { bus_address = 4, index = 0 }

[[alarms.rules]]
sensor = "garage"
min = 3.0
"#;

const GARAGE: DeviceAddress = DeviceAddress::new(4, 0);

fn write_config(contents: &str) -> (tempfile::TempDir, std::path::PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("plant.toml");
    std::fs::write(&path, contents).unwrap();
    (dir, path)
}

async fn get_text(plant: &Arc<Plant>, uri: &str) -> String {
    let response = api::router()
        .with_state(plant.clone())
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    json["text"].as_str().unwrap().to_string()
}

#[test]
fn test_invalid_file_lists_every_problem() {
    let broken = PLANT_TOML.replace("min = 3.0", "min = 3.0\n\n[cache]\nttl_ms = 0")
        + "\n[[alarms.rules]]\nsensor = \"attic\"\nmin = 1.0\n";
    let (_dir, path) = write_config(&broken);

    let Err(ConfigError::Validation(errors)) = Config::load_validated(&path) else {
        panic!("expected validation errors");
    };
    let fields: Vec<&str> = errors.iter().map(|e| e.field.as_str()).collect();
    assert!(fields.contains(&"cache.ttl_ms"));
    assert!(fields.contains(&"alarms.rules[1].sensor"));
}

#[tokio::test(start_paused = true)]
async fn test_garage_alarm_reaches_operator() {
    let (_dir, path) = write_config(PLANT_TOML);
    let config = Config::load_validated(&path).unwrap();
    assert_eq!(config.bus.endpoint(), "10.0.0.20:502");

    let bus = MockBus::new();
    bus.set_temperature(DeviceAddress::new(1, 0), 4.0);
    bus.set_temperature(GARAGE, 8.0);
    let notifier = MemoryNotifier::new();
    let plant = Plant::build(config, bus.clone(), Arc::new(notifier.clone()));

    let cancel = CancellationToken::new();
    let loops = Scheduler::new(plant.clone(), cancel.clone()).start();

    tokio::time::sleep(Duration::from_secs(45)).await;
    assert_eq!(plant.health(), HealthStatus::Ok);
    assert!(get_text(&plant, "/api/plant/alarms").await.contains("garage: ok 8.0°C"));

    // Garage door left open
    bus.set_temperature(GARAGE, 1.5);
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(plant.health(), HealthStatus::Emergency);
    assert_eq!(
        notifier.last().unwrap(),
        "EMERGENCY in the plant: low temperature at garage!"
    );
    assert!(get_text(&plant, "/api/plant/health").await.starts_with("Health: emergency"));

    cancel.cancel();
    futures::future::join_all(loops).await;
}
