//! Time-decaying sensor value cache.
//!
//! Several control loops read the same temperatures within the same second.
//! [`SensorCache`] keeps the last successful reading of every configured
//! sensor for a short TTL so those loops share one bus read instead of each
//! queueing their own behind the transport settle delay.
//!
//! Slots are keyed by logical sensor id, never by bus address: two sensors
//! that happen to share a register still have separate slots. Each slot has
//! its own async lock, so the freshness check and the refill happen as one
//! step and concurrent readers of the same sensor wait for a single fetch.
//! Failed reads are never memoized.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use boilerroom_core::{FieldTransport, MockBus, SensorCache, SensorSpec, TransportOptions};
//! use boilerroom_types::DeviceAddress;
//!
//! #[tokio::main]
//! async fn main() {
//!     let bus = MockBus::new();
//!     bus.set_register(DeviceAddress::new(1, 0), 215);
//!     let transport = FieldTransport::spawn(bus.clone(), TransportOptions::default());
//!
//!     let cache = SensorCache::new(transport, Duration::from_secs(1))
//!         .with_sensor("outdoor", SensorSpec::new(DeviceAddress::new(1, 0)));
//!
//!     assert_eq!(cache.get("outdoor").await.unwrap(), 21.5);
//! }
//! ```

use std::collections::HashMap;
use std::time::Duration;

use time::OffsetDateTime;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

use boilerroom_types::{DeviceAddress, SensorId, SensorReading, decode_register};

use crate::error::{Error, Result};
use crate::transport::FieldTransport;

/// Default scale of temperature registers (tenths of a degree).
pub const DEFAULT_SCALE: f64 = 0.1;

/// Where a sensor lives and how to decode it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SensorSpec {
    /// Holding register of the sensor.
    pub address: DeviceAddress,
    /// Multiplier applied to the signed raw value.
    pub scale: f64,
    /// Whether losing this sensor is an emergency.
    pub critical: bool,
}

impl SensorSpec {
    /// A non-critical sensor with the default scale.
    pub fn new(address: DeviceAddress) -> Self {
        Self {
            address,
            scale: DEFAULT_SCALE,
            critical: false,
        }
    }

    /// Set the scale.
    pub fn scale(mut self, scale: f64) -> Self {
        self.scale = scale;
        self
    }

    /// Mark the sensor as critical.
    pub fn critical(mut self, critical: bool) -> Self {
        self.critical = critical;
        self
    }
}

#[derive(Debug, Clone, Copy)]
struct Memo {
    value: f64,
    fetched_at: Instant,
    observed_at: OffsetDateTime,
}

#[derive(Debug)]
struct Slot {
    spec: SensorSpec,
    memo: Mutex<Option<Memo>>,
}

/// Per-sensor TTL cache over the field transport.
#[derive(Debug)]
pub struct SensorCache {
    transport: FieldTransport,
    ttl: Duration,
    slots: HashMap<SensorId, Slot>,
}

impl SensorCache {
    /// Create an empty cache.
    pub fn new(transport: FieldTransport, ttl: Duration) -> Self {
        Self {
            transport,
            ttl,
            slots: HashMap::new(),
        }
    }

    /// Register a sensor. A later registration under the same id replaces it.
    pub fn with_sensor(mut self, id: impl Into<SensorId>, spec: SensorSpec) -> Self {
        self.slots.insert(
            id.into(),
            Slot {
                spec,
                memo: Mutex::new(None),
            },
        );
        self
    }

    /// The configured TTL.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Configuration of a sensor, if registered.
    pub fn spec(&self, id: &str) -> Option<&SensorSpec> {
        self.slots.get(id).map(|slot| &slot.spec)
    }

    /// Whether losing the sensor is an emergency. Unknown sensors count as critical.
    pub fn is_critical(&self, id: &str) -> bool {
        self.spec(id).is_none_or(|spec| spec.critical)
    }

    /// Ids of all registered sensors.
    pub fn sensor_ids(&self) -> impl Iterator<Item = &SensorId> {
        self.slots.keys()
    }

    fn slot(&self, id: &str) -> Result<&Slot> {
        self.slots
            .get(id)
            .ok_or_else(|| Error::UnknownSensor(SensorId::from(id)))
    }

    async fn lookup(&self, id: &str) -> Result<Memo> {
        let slot = self.slot(id)?;
        let mut memo = slot.memo.lock().await;

        if let Some(cached) = *memo
            && cached.fetched_at.elapsed() < self.ttl
        {
            return Ok(cached);
        }

        let addr = slot.spec.address;
        let raw = match self.transport.read_register(addr.bus_address, addr.index).await {
            Ok(raw) => raw,
            Err(e) => {
                warn!("Failed to read sensor {} at {}: {}", id, addr, e);
                return Err(e.into());
            }
        };

        let fresh = Memo {
            value: decode_register(raw, slot.spec.scale),
            fetched_at: Instant::now(),
            observed_at: OffsetDateTime::now_utc(),
        };
        debug!("Sensor {} = {:.1}", id, fresh.value);
        *memo = Some(fresh);
        Ok(fresh)
    }

    /// Current value of a sensor, from the cache when younger than the TTL.
    pub async fn get(&self, id: &str) -> Result<f64> {
        self.lookup(id).await.map(|memo| memo.value)
    }

    /// Like [`get`](Self::get), but folds transport failures into a reading
    /// without a value. Only an unknown sensor id is an error.
    pub async fn reading(&self, id: &str) -> Result<SensorReading> {
        match self.lookup(id).await {
            Ok(memo) => Ok(SensorReading {
                sensor_id: SensorId::from(id),
                value: Some(memo.value),
                observed_at: memo.observed_at,
            }),
            Err(Error::Transport(_)) => Ok(SensorReading {
                sensor_id: SensorId::from(id),
                value: None,
                observed_at: OffsetDateTime::now_utc(),
            }),
            Err(e) => Err(e),
        }
    }
}
