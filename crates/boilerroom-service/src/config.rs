//! Plant configuration.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use boilerroom_core::{
    AlarmRule, BoilerConfig, ClimateCurve, DEFAULT_SCALE, HeatDemandConfig, HistoryConfig,
    SensorSpec, TransportOptions, ValveConfig,
};
use boilerroom_types::{DeviceAddress, SensorId};

/// Plant configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// HTTP server settings.
    pub server: ServerConfig,
    /// Field bus connection.
    pub bus: BusConfig,
    /// Sensor cache settings.
    pub cache: CacheConfig,
    /// Tick periods of the control loops.
    pub schedule: ScheduleConfig,
    /// Temperature sensors by id.
    pub sensors: BTreeMap<SensorId, SensorConfig>,
    /// Boiler wiring and status estimation.
    pub boiler: BoilerConfig,
    /// Outdoor heat demand switch.
    pub heat_demand: HeatDemandConfig,
    /// Climate curves.
    pub curves: CurvesConfig,
    /// Mixing valve.
    pub valve: ValveConfig,
    /// Low temperature alarms.
    pub alarms: AlarmsConfig,
    /// Health aggregation.
    pub health: HealthConfig,
    /// History retention and power estimation.
    pub history: HistoryConfig,
    /// Operator notifications.
    pub notify: NotifyConfig,
}

impl Default for Config {
    fn default() -> Self {
        let sensor = |bus_address, index, critical| SensorConfig {
            address: DeviceAddress::new(bus_address, index),
            scale: DEFAULT_SCALE,
            critical,
        };
        let sensors = BTreeMap::from([
            (SensorId::from("outdoor"), sensor(1, 0, false)),
            (SensorId::from("boiler_supply"), sensor(1, 1, true)),
            (SensorId::from("boiler_return"), sensor(1, 2, true)),
            (SensorId::from("floor_supply"), sensor(1, 3, true)),
            (SensorId::from("floor_return"), sensor(1, 4, false)),
            (SensorId::from("living_room"), sensor(1, 5, false)),
        ]);

        Self {
            server: ServerConfig::default(),
            bus: BusConfig::default(),
            cache: CacheConfig::default(),
            schedule: ScheduleConfig::default(),
            sensors,
            boiler: BoilerConfig::default(),
            heat_demand: HeatDemandConfig::default(),
            curves: CurvesConfig::default(),
            valve: ValveConfig::default(),
            alarms: AlarmsConfig::default(),
            health: HealthConfig::default(),
            history: HistoryConfig::default(),
            notify: NotifyConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from the default path.
    pub fn load_default() -> Result<Self, ConfigError> {
        let path = default_config_path();
        if path.exists() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from a file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::Read {
            path: path.as_ref().to_path_buf(),
            source: e,
        })?;
        toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.as_ref().to_path_buf(),
            source: e,
        })
    }

    /// Save configuration to a file.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self).map_err(ConfigError::Serialize)?;

        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::Write {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        std::fs::write(path.as_ref(), content).map_err(|e| ConfigError::Write {
            path: path.as_ref().to_path_buf(),
            source: e,
        })
    }

    /// Validate the configuration and return every problem found.
    ///
    /// Besides the range checks of each section this verifies that every
    /// sensor referenced by a control loop or an alarm is defined under
    /// `[sensors]`.
    ///
    /// # Example
    ///
    /// ```
    /// use boilerroom_service::Config;
    ///
    /// let config = Config::default();
    /// config.validate().expect("Default config should be valid");
    /// ```
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();

        errors.extend(self.server.validate());
        errors.extend(self.bus.validate());
        errors.extend(self.cache.validate());
        errors.extend(self.schedule.validate());
        errors.extend(self.health.validate());
        errors.extend(self.notify.validate());

        for (id, sensor) in &self.sensors {
            errors.extend(sensor.validate(&format!("sensors.{}", id)));
        }

        let sections = [
            ("boiler", self.boiler.validate()),
            ("heat_demand", self.heat_demand.validate()),
            ("valve", self.valve.validate()),
            ("history", self.history.validate()),
            ("curves.boiler", self.curves.boiler.validate()),
            ("curves.floor", self.curves.floor.validate()),
            ("curves.return", self.curves.return_.validate()),
        ];
        for (field, result) in sections {
            if let Err(e) = result {
                errors.push(ValidationError {
                    field: field.to_string(),
                    message: e.to_string(),
                });
            }
        }

        for (field, relay) in [
            ("boiler.relay", self.boiler.relay),
            ("valve.relay", self.valve.relay),
        ] {
            if self.bus.channels_per_board > 0 && relay.index >= self.bus.channels_per_board {
                errors.push(ValidationError {
                    field: field.to_string(),
                    message: format!(
                        "relay {} is beyond the {} channels of its board",
                        relay, self.bus.channels_per_board
                    ),
                });
            }
        }

        for (field, sensor) in self.sensor_references() {
            if !self.sensors.contains_key(sensor) {
                errors.push(ValidationError {
                    field,
                    message: format!("unknown sensor '{}'", sensor),
                });
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors))
        }
    }

    /// Load and validate configuration from a file.
    pub fn load_validated<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config = Self::load(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Sensor specs for the cache.
    pub fn sensor_specs(&self) -> impl Iterator<Item = (SensorId, SensorSpec)> + '_ {
        self.sensors
            .iter()
            .map(|(id, sensor)| (id.clone(), sensor.spec()))
    }

    fn sensor_references(&self) -> Vec<(String, &SensorId)> {
        let mut refs = vec![
            ("boiler.supply_sensor".to_string(), &self.boiler.supply_sensor),
            ("boiler.return_sensor".to_string(), &self.boiler.return_sensor),
            ("boiler.outdoor_sensor".to_string(), &self.boiler.outdoor_sensor),
            (
                "heat_demand.outdoor_sensor".to_string(),
                &self.heat_demand.outdoor_sensor,
            ),
            ("valve.pre_mix_sensor".to_string(), &self.valve.pre_mix_sensor),
            ("valve.post_mix_sensor".to_string(), &self.valve.post_mix_sensor),
            (
                "valve.floor_return_sensor".to_string(),
                &self.valve.floor_return_sensor,
            ),
            ("valve.outdoor_sensor".to_string(), &self.valve.outdoor_sensor),
        ];
        for (i, sensor) in self.valve.indoor_sensors.iter().enumerate() {
            refs.push((format!("valve.indoor_sensors[{}]", i), sensor));
        }
        for (i, rule) in self.alarms.rules.iter().enumerate() {
            refs.push((format!("alarms.rules[{}].sensor", i), &rule.sensor));
        }
        refs
    }
}

/// Server configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address (e.g., "127.0.0.1:8080").
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8080".to_string(),
        }
    }
}

impl ServerConfig {
    /// Validate server configuration.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if self.bind.is_empty() {
            errors.push(ValidationError {
                field: "server.bind".to_string(),
                message: "bind address cannot be empty".to_string(),
            });
            return errors;
        }

        match self.bind.rsplit_once(':') {
            None => errors.push(ValidationError {
                field: "server.bind".to_string(),
                message: format!(
                    "invalid bind address '{}': expected format 'host:port'",
                    self.bind
                ),
            }),
            Some((_, port)) => match port.parse::<u16>() {
                Ok(0) => errors.push(ValidationError {
                    field: "server.bind".to_string(),
                    message: "port cannot be 0".to_string(),
                }),
                Err(_) => errors.push(ValidationError {
                    field: "server.bind".to_string(),
                    message: format!("invalid port '{}': must be a number 1-65535", port),
                }),
                Ok(_) => {}
            },
        }

        errors
    }
}

/// Maximum settle delay in milliseconds.
pub const MAX_SETTLE_DELAY_MS: u64 = 10_000;

/// Field bus (Modbus TCP gateway) configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    /// Gateway host name or address.
    pub host: String,
    /// Gateway TCP port.
    pub port: u16,
    /// Pause after every bus operation in milliseconds.
    pub settle_delay_ms: u64,
    /// Timeout for connecting and for each operation in milliseconds.
    pub operation_timeout_ms: u64,
    /// Coils / discrete inputs per relay board.
    pub channels_per_board: u16,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 502,
            settle_delay_ms: 50,
            operation_timeout_ms: 1000,
            channels_per_board: 8,
        }
    }
}

impl BusConfig {
    /// `host:port` of the gateway.
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Apply a `host` or `host:port` override.
    pub fn set_endpoint(&mut self, endpoint: &str) {
        match endpoint.rsplit_once(':') {
            Some((host, port)) if !host.is_empty() => match port.parse::<u16>() {
                Ok(port) => {
                    self.host = host.to_string();
                    self.port = port;
                }
                Err(_) => self.host = endpoint.to_string(),
            },
            _ => self.host = endpoint.to_string(),
        }
    }

    /// Transport worker options.
    pub fn transport_options(&self) -> TransportOptions {
        TransportOptions::default()
            .settle_delay(Duration::from_millis(self.settle_delay_ms))
            .operation_timeout(Duration::from_millis(self.operation_timeout_ms))
            .channels_per_board(self.channels_per_board)
    }

    /// Validate bus configuration.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if self.host.is_empty() {
            errors.push(ValidationError {
                field: "bus.host".to_string(),
                message: "gateway host cannot be empty".to_string(),
            });
        }
        if self.port == 0 {
            errors.push(ValidationError {
                field: "bus.port".to_string(),
                message: "port cannot be 0".to_string(),
            });
        }
        if self.settle_delay_ms > MAX_SETTLE_DELAY_MS {
            errors.push(ValidationError {
                field: "bus.settle_delay_ms".to_string(),
                message: format!(
                    "settle delay {} is too long (maximum {} ms)",
                    self.settle_delay_ms, MAX_SETTLE_DELAY_MS
                ),
            });
        }
        if self.operation_timeout_ms == 0 {
            errors.push(ValidationError {
                field: "bus.operation_timeout_ms".to_string(),
                message: "operation timeout must be > 0".to_string(),
            });
        }
        if self.channels_per_board == 0 {
            errors.push(ValidationError {
                field: "bus.channels_per_board".to_string(),
                message: "a board needs at least one channel".to_string(),
            });
        }

        errors
    }
}

/// Sensor cache configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// How long a reading stays fresh, in milliseconds.
    pub ttl_ms: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { ttl_ms: 1000 }
    }
}

impl CacheConfig {
    /// TTL as a duration.
    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms)
    }

    /// Validate cache configuration.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        if self.ttl_ms == 0 {
            errors.push(ValidationError {
                field: "cache.ttl_ms".to_string(),
                message: "ttl must be > 0".to_string(),
            });
        }
        errors
    }
}

/// Minimum tick period in seconds.
pub const MIN_PERIOD: u64 = 1;
/// Maximum tick period in seconds (1 hour).
pub const MAX_PERIOD: u64 = 3600;

/// Tick periods of the control loops, in seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    /// Boiler relay management.
    pub relay_secs: u64,
    /// Boiler status estimation.
    pub boiler_secs: u64,
    /// Heat demand.
    pub heat_demand_secs: u64,
    /// Mixing valve control.
    pub valve_secs: u64,
    /// Low temperature alarms.
    pub alarms_secs: u64,
    /// Health aggregation.
    pub health_secs: u64,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            relay_secs: 10,
            boiler_secs: 30,
            heat_demand_secs: 60,
            valve_secs: 60,
            alarms_secs: 60,
            health_secs: 60,
        }
    }
}

impl ScheduleConfig {
    /// Validate tick periods.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        for (name, value) in [
            ("relay_secs", self.relay_secs),
            ("boiler_secs", self.boiler_secs),
            ("heat_demand_secs", self.heat_demand_secs),
            ("valve_secs", self.valve_secs),
            ("alarms_secs", self.alarms_secs),
            ("health_secs", self.health_secs),
        ] {
            if !(MIN_PERIOD..=MAX_PERIOD).contains(&value) {
                errors.push(ValidationError {
                    field: format!("schedule.{}", name),
                    message: format!(
                        "period {} is out of range ({}-{} seconds)",
                        value, MIN_PERIOD, MAX_PERIOD
                    ),
                });
            }
        }
        errors
    }
}

/// One temperature sensor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorConfig {
    /// Holding register of the sensor.
    pub address: DeviceAddress,
    /// Multiplier applied to the raw register.
    #[serde(default = "default_scale")]
    pub scale: f64,
    /// Whether losing this sensor is an emergency.
    #[serde(default)]
    pub critical: bool,
}

fn default_scale() -> f64 {
    DEFAULT_SCALE
}

impl SensorConfig {
    /// Cache spec for this sensor.
    pub fn spec(&self) -> SensorSpec {
        SensorSpec::new(self.address)
            .scale(self.scale)
            .critical(self.critical)
    }

    /// Validate sensor configuration.
    pub fn validate(&self, prefix: &str) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        if !self.scale.is_finite() || self.scale == 0.0 {
            errors.push(ValidationError {
                field: format!("{}.scale", prefix),
                message: "scale must be a non-zero number".to_string(),
            });
        }
        errors
    }
}

/// Climate curves used by the control loops.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CurvesConfig {
    /// Boiler supply target.
    pub boiler: ClimateCurve,
    /// Floor heating supply target.
    pub floor: ClimateCurve,
    /// Minimum boiler return before a new ignition.
    #[serde(rename = "return")]
    pub return_: ClimateCurve,
}

impl Default for CurvesConfig {
    fn default() -> Self {
        Self {
            boiler: ClimateCurve::new(-20.0, 10.0, 80.0, 50.0),
            floor: ClimateCurve::new(-20.0, 10.0, 45.0, 25.0),
            return_: ClimateCurve::new(-20.0, 10.0, 45.0, 35.0),
        }
    }
}

/// Low temperature alarm rules.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlarmsConfig {
    /// Rules, one per watched sensor.
    pub rules: Vec<AlarmRule>,
}

/// Health aggregation settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    /// Events that may queue between two health ticks.
    pub queue_capacity: usize,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 256,
        }
    }
}

impl HealthConfig {
    /// Validate health configuration.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        if self.queue_capacity == 0 {
            errors.push(ValidationError {
                field: "health.queue_capacity".to_string(),
                message: "queue capacity must be > 0".to_string(),
            });
        }
        errors
    }
}

/// Operator notification settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifyConfig {
    /// Write notifications to the log.
    pub log: bool,
    /// Webhook URLs receiving a JSON message per notification.
    pub webhooks: Vec<String>,
    /// Per-request timeout for webhooks in seconds.
    pub timeout_secs: u64,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            log: true,
            webhooks: Vec::new(),
            timeout_secs: 10,
        }
    }
}

impl NotifyConfig {
    /// Validate notification settings.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        for (i, url) in self.webhooks.iter().enumerate() {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                errors.push(ValidationError {
                    field: format!("notify.webhooks[{}]", i),
                    message: format!("'{}' is not an http(s) URL", url),
                });
            }
        }
        if self.timeout_secs == 0 {
            errors.push(ValidationError {
                field: "notify.timeout_secs".to_string(),
                message: "timeout must be > 0".to_string(),
            });
        }
        errors
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("Failed to serialize config: {0}")]
    Serialize(toml::ser::Error),
    #[error("Failed to write config file {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Configuration validation failed:\n{}", format_validation_errors(.0))]
    Validation(Vec<ValidationError>),
}

/// A single validation error with context.
#[derive(Debug, Clone)]
pub struct ValidationError {
    /// The field path (e.g., `server.bind` or `sensors.outdoor.scale`).
    pub field: String,
    /// Description of the validation failure.
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

fn format_validation_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(|e| format!("  - {}", e))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Default configuration file path.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("boilerroom")
        .join("plant.toml")
}
