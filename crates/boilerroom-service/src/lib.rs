//! Plant scheduler and HTTP command surface for the boilerroom controller.
//!
//! This crate provides a service that:
//! - Wires every control component over one Modbus TCP gateway
//! - Runs the control loops on their configured periods
//! - Sends health change notifications to the log and to webhooks
//! - Exposes operator commands and status over HTTP
//!
//! # REST API Endpoints
//!
//! - `GET /api/health` - Service liveness
//! - `GET /api/status` - Machine-readable plant status
//! - `GET /api/plant` - All status sections as text
//! - `GET /api/plant/{health,heat-demand,boiler,relay,valve,alarms,bus,summary}` - One section
//! - `POST /api/plant/relay` - Set the boiler relay override (`{"mode": "force_on"}`)
//! - `POST /api/plant/relay/{force-on,force-off,auto}` - Shortcuts for the above
//!
//! # Configuration
//!
//! The service reads configuration from `~/.config/boilerroom/plant.toml`:
//!
//! ```toml
//! [server]
//! bind = "127.0.0.1:8080"
//!
//! [bus]
//! host = "192.168.1.50"
//! port = 502
//! settle_delay_ms = 50
//!
//! [sensors.outdoor]
//! address = { bus_address = 1, index = 0 }
//!
//! [sensors.boiler_supply]
//! address = { bus_address = 1, index = 1 }
//! critical = true
//!
//! [heat_demand]
//! target = 16.0
//! hysteresis = 2.0
//!
//! [[alarms.rules]]
//! sensor = "boiler_room"
//! min = 5.0
//!
//! [notify]
//! webhooks = ["https://chat.example.com/hooks/plant"]
//! ```

pub mod api;
pub mod config;
pub mod notify;
pub mod plant;
pub mod scheduler;

pub use config::{
    BusConfig, CacheConfig, Config, ConfigError, HealthConfig, NotifyConfig, ScheduleConfig,
    SensorConfig, ServerConfig, ValidationError, default_config_path,
};
pub use notify::{FanoutNotifier, WebhookNotifier, build_notifier};
pub use plant::{ControlTask, Plant};
pub use scheduler::Scheduler;
