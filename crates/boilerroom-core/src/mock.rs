//! Mock field bus for testing.
//!
//! This module provides an in-memory bus that can be used for unit testing
//! without a Modbus gateway. [`MockBus`] implements [`BusConnector`], so it
//! plugs straight into [`FieldTransport`](crate::transport::FieldTransport).
//!
//! # Features
//!
//! - **Plant state**: set registers, coils and discrete inputs per unit
//! - **Operation log**: every frame that reached the bus, with its start time
//! - **Failure injection**: fail connects or operations, permanently or N times,
//!   or take a single board offline or make it read-only
//! - **Latency simulation**: delay every operation to model a slow gateway
//! - **Link resets**: drop all open links to exercise reconnection

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use boilerroom_types::DeviceAddress;

use crate::error::TransportError;
use crate::traits::{BusConnector, BusLink, LinkResult};

/// A frame that reached the mock bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BusOp {
    /// Discrete input bank read.
    ReadDiscreteInputs { unit: u8, start: u16, count: u16 },
    /// Coil bank read.
    ReadCoils { unit: u8, start: u16, count: u16 },
    /// Single coil write.
    WriteCoil { unit: u8, index: u16, value: bool },
    /// Holding register read.
    ReadRegisters { unit: u8, start: u16, count: u16 },
    /// Single register write.
    WriteRegister { unit: u8, index: u16, value: u16 },
}

impl BusOp {
    /// Board the frame is addressed to.
    pub fn unit(&self) -> u8 {
        match *self {
            BusOp::ReadDiscreteInputs { unit, .. }
            | BusOp::ReadCoils { unit, .. }
            | BusOp::WriteCoil { unit, .. }
            | BusOp::ReadRegisters { unit, .. }
            | BusOp::WriteRegister { unit, .. } => unit,
        }
    }

    /// Whether the frame modifies plant state.
    pub fn is_write(&self) -> bool {
        matches!(self, BusOp::WriteCoil { .. } | BusOp::WriteRegister { .. })
    }
}

#[derive(Default)]
struct PlantState {
    registers: HashMap<(u8, u16), u16>,
    coils: HashMap<(u8, u16), bool>,
    inputs: HashMap<(u8, u16), bool>,
    offline_units: HashSet<u8>,
    read_only_units: HashSet<u8>,
    log: Vec<(Instant, BusOp)>,
}

struct Inner {
    endpoint: String,
    state: Mutex<PlantState>,
    connected_generation: AtomicU64,
    connect_count: AtomicU32,
    should_fail: AtomicBool,
    writes_should_fail: AtomicBool,
    remaining_failures: AtomicU32,
    connect_should_fail: AtomicBool,
    remaining_connect_failures: AtomicU32,
    latency_ms: AtomicU64,
    in_flight: AtomicU32,
    max_in_flight: AtomicU32,
}

/// An in-memory field bus.
///
/// Cloning yields another handle to the same bus.
///
/// # Example
///
/// ```
/// use boilerroom_core::{FieldTransport, MockBus, TransportOptions};
/// use boilerroom_types::DeviceAddress;
///
/// #[tokio::main]
/// async fn main() {
///     let bus = MockBus::new();
///     bus.set_register(DeviceAddress::new(3, 0), 215);
///
///     let transport = FieldTransport::spawn(bus.clone(), TransportOptions::default());
///     assert_eq!(transport.read_register(3, 0).await.unwrap(), 215);
///     assert_eq!(bus.op_count(), 1);
/// }
/// ```
#[derive(Clone)]
pub struct MockBus {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for MockBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockBus")
            .field("endpoint", &self.inner.endpoint)
            .field("connect_count", &self.connect_count())
            .field("op_count", &self.op_count())
            .finish()
    }
}

impl Default for MockBus {
    fn default() -> Self {
        Self::new()
    }
}

impl MockBus {
    /// Create an empty bus. Unset registers read as 0 and unset bits as false.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                endpoint: "mock://bus".to_string(),
                state: Mutex::new(PlantState::default()),
                connected_generation: AtomicU64::new(0),
                connect_count: AtomicU32::new(0),
                should_fail: AtomicBool::new(false),
                writes_should_fail: AtomicBool::new(false),
                remaining_failures: AtomicU32::new(0),
                connect_should_fail: AtomicBool::new(false),
                remaining_connect_failures: AtomicU32::new(0),
                latency_ms: AtomicU64::new(0),
                in_flight: AtomicU32::new(0),
                max_in_flight: AtomicU32::new(0),
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, PlantState> {
        // A panicking test thread may poison the lock; the data is still usable.
        self.inner
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    // --- Plant state ---

    /// Set a holding register.
    pub fn set_register(&self, addr: DeviceAddress, value: u16) {
        self.state()
            .registers
            .insert((addr.bus_address, addr.index), value);
    }

    /// Set a holding register from a signed temperature in tenths.
    pub fn set_temperature(&self, addr: DeviceAddress, celsius: f64) {
        self.set_register(addr, ((celsius * 10.0).round() as i16) as u16);
    }

    /// Read back a holding register.
    pub fn register(&self, addr: DeviceAddress) -> u16 {
        self.state()
            .registers
            .get(&(addr.bus_address, addr.index))
            .copied()
            .unwrap_or(0)
    }

    /// Set a coil.
    pub fn set_coil(&self, addr: DeviceAddress, value: bool) {
        self.state().coils.insert((addr.bus_address, addr.index), value);
    }

    /// Read back a coil.
    pub fn coil(&self, addr: DeviceAddress) -> bool {
        self.state()
            .coils
            .get(&(addr.bus_address, addr.index))
            .copied()
            .unwrap_or(false)
    }

    /// Set a discrete input.
    pub fn set_input(&self, addr: DeviceAddress, value: bool) {
        self.state().inputs.insert((addr.bus_address, addr.index), value);
    }

    // --- Operation log ---

    /// Every frame that reached the bus, in order.
    pub fn ops(&self) -> Vec<BusOp> {
        self.state().log.iter().map(|(_, op)| op.clone()).collect()
    }

    /// Every frame with the instant it started.
    pub fn timed_ops(&self) -> Vec<(Instant, BusOp)> {
        self.state().log.clone()
    }

    /// Number of frames that reached the bus.
    pub fn op_count(&self) -> usize {
        self.state().log.len()
    }

    /// Number of write frames that reached the bus.
    pub fn write_count(&self) -> usize {
        self.state().log.iter().filter(|(_, op)| op.is_write()).count()
    }

    /// Forget the operation log.
    pub fn clear_ops(&self) {
        self.state().log.clear();
    }

    /// Number of links opened so far.
    pub fn connect_count(&self) -> u32 {
        self.inner.connect_count.load(Ordering::SeqCst)
    }

    /// Highest number of operations observed executing at the same time.
    pub fn max_concurrent_ops(&self) -> u32 {
        self.inner.max_in_flight.load(Ordering::SeqCst)
    }

    // --- Failure injection ---

    /// Make every operation fail until cleared.
    pub fn set_should_fail(&self, fail: bool) {
        self.inner.should_fail.store(fail, Ordering::SeqCst);
    }

    /// Make every write frame fail with an exception response until cleared.
    /// Reads keep working.
    pub fn set_writes_should_fail(&self, fail: bool) {
        self.inner.writes_should_fail.store(fail, Ordering::SeqCst);
    }

    /// Fail the next `count` operations, then succeed.
    pub fn set_transient_failures(&self, count: u32) {
        self.inner.remaining_failures.store(count, Ordering::SeqCst);
    }

    /// Make every connect attempt fail until cleared.
    pub fn set_connect_should_fail(&self, fail: bool) {
        self.inner.connect_should_fail.store(fail, Ordering::SeqCst);
    }

    /// Fail the next `count` connect attempts, then succeed.
    pub fn set_transient_connect_failures(&self, count: u32) {
        self.inner
            .remaining_connect_failures
            .store(count, Ordering::SeqCst);
    }

    /// Delay every operation by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        self.inner
            .latency_ms
            .store(latency.as_millis() as u64, Ordering::SeqCst);
    }

    /// Make one board stop answering. Its frames fail with an exception
    /// response while the link and the other boards keep working.
    pub fn set_unit_offline(&self, unit: u8, offline: bool) {
        let mut state = self.state();
        if offline {
            state.offline_units.insert(unit);
        } else {
            state.offline_units.remove(&unit);
        }
    }

    /// Make a board reject writes while still answering reads.
    pub fn set_unit_read_only(&self, unit: u8, read_only: bool) {
        let mut state = self.state();
        if read_only {
            state.read_only_units.insert(unit);
        } else {
            state.read_only_units.remove(&unit);
        }
    }

    /// Invalidate all open links; their next operation fails with an I/O error.
    pub fn drop_links(&self) {
        self.inner.connected_generation.fetch_add(1, Ordering::SeqCst);
    }

    fn take_failure(flag: &AtomicBool, remaining: &AtomicU32) -> bool {
        let transient = remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        transient || flag.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BusConnector for MockBus {
    async fn connect(&self) -> LinkResult<Box<dyn BusLink>> {
        if Self::take_failure(
            &self.inner.connect_should_fail,
            &self.inner.remaining_connect_failures,
        ) {
            return Err(TransportError::connect(&self.inner.endpoint, "mock connect failure"));
        }
        self.inner.connect_count.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockLink {
            bus: self.clone(),
            generation: self.inner.connected_generation.load(Ordering::SeqCst),
        }))
    }

    fn endpoint(&self) -> String {
        self.inner.endpoint.clone()
    }
}

/// A link opened on a [`MockBus`].
struct MockLink {
    bus: MockBus,
    generation: u64,
}

impl MockLink {
    async fn execute(&mut self, op: BusOp) -> LinkResult<PlantReply> {
        let inner = Arc::clone(&self.bus.inner);
        let now_in_flight = inner.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        inner.max_in_flight.fetch_max(now_in_flight, Ordering::SeqCst);

        let result = self.execute_inner(op).await;

        inner.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }

    async fn execute_inner(&mut self, op: BusOp) -> LinkResult<PlantReply> {
        let inner = &self.bus.inner;
        let name = format!("{:?}", op);

        if inner.connected_generation.load(Ordering::SeqCst) != self.generation {
            return Err(TransportError::io(name, "connection reset by peer"));
        }

        self.bus.state().log.push((Instant::now(), op.clone()));

        let latency = inner.latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }

        if MockBus::take_failure(&inner.should_fail, &inner.remaining_failures) {
            return Err(TransportError::io(name, "mock failure"));
        }

        let mut state = self.bus.state();
        if state.offline_units.contains(&op.unit()) {
            return Err(TransportError::exception(name, "GatewayTargetDevice"));
        }
        if op.is_write() && inner.writes_should_fail.load(Ordering::SeqCst) {
            return Err(TransportError::exception(name, "ServerDeviceFailure"));
        }
        if op.is_write() && state.read_only_units.contains(&op.unit()) {
            return Err(TransportError::exception(name, "IllegalFunction"));
        }
        let reply = match op {
            BusOp::ReadDiscreteInputs { unit, start, count } => PlantReply::Bits(
                (start..start + count)
                    .map(|i| state.inputs.get(&(unit, i)).copied().unwrap_or(false))
                    .collect(),
            ),
            BusOp::ReadCoils { unit, start, count } => PlantReply::Bits(
                (start..start + count)
                    .map(|i| state.coils.get(&(unit, i)).copied().unwrap_or(false))
                    .collect(),
            ),
            BusOp::WriteCoil { unit, index, value } => {
                state.coils.insert((unit, index), value);
                PlantReply::Done
            }
            BusOp::ReadRegisters { unit, start, count } => PlantReply::Words(
                (start..start + count)
                    .map(|i| state.registers.get(&(unit, i)).copied().unwrap_or(0))
                    .collect(),
            ),
            BusOp::WriteRegister { unit, index, value } => {
                state.registers.insert((unit, index), value);
                PlantReply::Done
            }
        };
        Ok(reply)
    }
}

enum PlantReply {
    Bits(Vec<bool>),
    Words(Vec<u16>),
    Done,
}

fn unexpected<T>(op: &str) -> LinkResult<T> {
    Err(TransportError::malformed(op, "unexpected mock reply"))
}

#[async_trait]
impl BusLink for MockLink {
    async fn read_discrete_inputs(
        &mut self,
        unit: u8,
        start: u16,
        count: u16,
    ) -> LinkResult<Vec<bool>> {
        match self.execute(BusOp::ReadDiscreteInputs { unit, start, count }).await? {
            PlantReply::Bits(bits) => Ok(bits),
            _ => unexpected("read_discrete_inputs"),
        }
    }

    async fn read_coils(&mut self, unit: u8, start: u16, count: u16) -> LinkResult<Vec<bool>> {
        match self.execute(BusOp::ReadCoils { unit, start, count }).await? {
            PlantReply::Bits(bits) => Ok(bits),
            _ => unexpected("read_coils"),
        }
    }

    async fn write_coil(&mut self, unit: u8, index: u16, value: bool) -> LinkResult<()> {
        match self.execute(BusOp::WriteCoil { unit, index, value }).await? {
            PlantReply::Done => Ok(()),
            _ => unexpected("write_coil"),
        }
    }

    async fn read_holding_registers(
        &mut self,
        unit: u8,
        start: u16,
        count: u16,
    ) -> LinkResult<Vec<u16>> {
        match self.execute(BusOp::ReadRegisters { unit, start, count }).await? {
            PlantReply::Words(words) => Ok(words),
            _ => unexpected("read_holding_registers"),
        }
    }

    async fn write_register(&mut self, unit: u8, index: u16, value: u16) -> LinkResult<()> {
        match self.execute(BusOp::WriteRegister { unit, index, value }).await? {
            PlantReply::Done => Ok(()),
            _ => unexpected("write_register"),
        }
    }
}
