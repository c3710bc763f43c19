//! Serialized field-bus transport.
//!
//! All bus traffic goes through one worker task that owns the link. Callers
//! hold a cheap [`FieldTransport`] handle, queue a request and await the
//! reply, so two control loops can never interleave frames on the wire.
//!
//! After every operation, successful or not, the worker sleeps for the
//! configured settle delay before taking the next request. This models the
//! switching time of relays and converters on the boards, and means call
//! latency grows with the number of concurrent callers.
//!
//! The link is opened lazily on first use and re-opened on the next request
//! after any failure that invalidates it. There is no retry inside the
//! transport: a failed request is reported once and the caller decides what
//! to do (in practice, try again on its next tick).

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

use boilerroom_types::DeviceAddress;

use crate::error::TransportError;
use crate::traits::{BusConnector, BusLink, LinkResult};

/// Options for the transport worker.
#[derive(Debug, Clone)]
pub struct TransportOptions {
    /// Pause after every operation before the next one is started.
    pub settle_delay: Duration,
    /// Upper bound for connecting or for a single operation.
    pub operation_timeout: Duration,
    /// Number of coils / discrete inputs read per bank read.
    pub channels_per_board: u16,
    /// How many requests may wait in the queue.
    pub queue_capacity: usize,
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self {
            settle_delay: Duration::from_millis(50),
            operation_timeout: Duration::from_secs(1),
            channels_per_board: 8,
            queue_capacity: 64,
        }
    }
}

impl TransportOptions {
    /// Set the settle delay.
    pub fn settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = delay;
        self
    }

    /// Set the operation timeout.
    pub fn operation_timeout(mut self, duration: Duration) -> Self {
        self.operation_timeout = duration;
        self
    }

    /// Set the bank width.
    pub fn channels_per_board(mut self, channels: u16) -> Self {
        self.channels_per_board = channels;
        self
    }
}

#[derive(Debug, Clone, Copy)]
enum Request {
    ReadDiscreteInputs { unit: u8, count: u16 },
    ReadCoils { unit: u8, count: u16 },
    WriteCoil { unit: u8, index: u16, value: bool },
    ReadRegisters { unit: u8, start: u16, count: u16 },
    WriteRegister { unit: u8, index: u16, value: u16 },
}

impl Request {
    fn describe(&self) -> String {
        match *self {
            Request::ReadDiscreteInputs { unit, count } => {
                format!("read_discrete_inputs {}+{}", unit, count)
            }
            Request::ReadCoils { unit, count } => format!("read_coils {}+{}", unit, count),
            Request::WriteCoil { unit, index, value } => {
                format!("write_coil {}:{}={}", unit, index, value)
            }
            Request::ReadRegisters { unit, start, count } => {
                format!("read_registers {}:{}+{}", unit, start, count)
            }
            Request::WriteRegister { unit, index, value } => {
                format!("write_register {}:{}={}", unit, index, value)
            }
        }
    }
}

#[derive(Debug)]
enum Reply {
    Bits(Vec<bool>),
    Words(Vec<u16>),
    Done,
}

struct Job {
    request: Request,
    reply: oneshot::Sender<LinkResult<Reply>>,
}

/// Counters kept by the worker.
#[derive(Debug, Default)]
struct TransportStats {
    operations: AtomicU64,
    failures: AtomicU64,
    connects: AtomicU64,
    connected: AtomicBool,
    last_error: Mutex<Option<String>>,
}

impl TransportStats {
    fn record_failure(&self, error: &TransportError) {
        self.failures.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut last) = self.last_error.lock() {
            *last = Some(error.to_string());
        }
    }
}

/// Point-in-time copy of the transport counters.
#[derive(Debug, Clone, Serialize)]
pub struct TransportSnapshot {
    /// Endpoint the transport talks to.
    pub endpoint: String,
    /// Whether a link is currently open.
    pub connected: bool,
    /// Operations executed (successful or not).
    pub operations: u64,
    /// Operations that failed.
    pub failures: u64,
    /// Links opened.
    pub connects: u64,
    /// Most recent failure.
    pub last_error: Option<String>,
}

/// Handle to the serialized field-bus worker.
///
/// Cloning is cheap; all clones feed the same worker.
#[derive(Clone)]
pub struct FieldTransport {
    tx: mpsc::Sender<Job>,
    stats: Arc<TransportStats>,
    endpoint: Arc<str>,
    channels_per_board: u16,
}

impl std::fmt::Debug for FieldTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FieldTransport")
            .field("endpoint", &self.endpoint)
            .field("connected", &self.stats.connected.load(Ordering::Relaxed))
            .finish()
    }
}

impl FieldTransport {
    /// Spawn the worker on the current tokio runtime and return a handle.
    ///
    /// The worker exits once every handle has been dropped.
    pub fn spawn<C>(connector: C, options: TransportOptions) -> Self
    where
        C: BusConnector + 'static,
    {
        let (tx, rx) = mpsc::channel(options.queue_capacity.max(1));
        let stats = Arc::new(TransportStats::default());
        let endpoint: Arc<str> = connector.endpoint().into();
        let channels_per_board = options.channels_per_board;

        let worker = Worker {
            connector: Box::new(connector),
            link: None,
            options,
            stats: Arc::clone(&stats),
        };
        tokio::spawn(worker.run(rx));

        Self {
            tx,
            stats,
            endpoint,
            channels_per_board,
        }
    }

    async fn submit(&self, request: Request) -> LinkResult<Reply> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(Job {
                request,
                reply: reply_tx,
            })
            .await
            .map_err(|_| TransportError::WorkerStopped)?;
        reply_rx.await.map_err(|_| TransportError::WorkerStopped)?
    }

    /// Read the whole discrete input bank of a board.
    pub async fn read_discrete_inputs(&self, unit: u8) -> LinkResult<Vec<bool>> {
        let request = Request::ReadDiscreteInputs {
            unit,
            count: self.channels_per_board,
        };
        match self.submit(request).await? {
            Reply::Bits(bits) => Ok(bits),
            _ => Err(TransportError::malformed(request.describe(), "expected bits")),
        }
    }

    /// Read the whole coil bank of a board.
    pub async fn read_coils(&self, unit: u8) -> LinkResult<Vec<bool>> {
        let request = Request::ReadCoils {
            unit,
            count: self.channels_per_board,
        };
        match self.submit(request).await? {
            Reply::Bits(bits) => Ok(bits),
            _ => Err(TransportError::malformed(request.describe(), "expected bits")),
        }
    }

    /// Read one coil by reading its board's bank.
    pub async fn read_coil(&self, addr: DeviceAddress) -> LinkResult<bool> {
        let bank = self.read_coils(addr.bus_address).await?;
        bank.get(usize::from(addr.index)).copied().ok_or_else(|| {
            TransportError::malformed(
                format!("read_coil {}", addr),
                format!("index outside bank of {}", bank.len()),
            )
        })
    }

    /// Read one discrete input by reading its board's bank.
    pub async fn read_discrete_input(&self, addr: DeviceAddress) -> LinkResult<bool> {
        let bank = self.read_discrete_inputs(addr.bus_address).await?;
        bank.get(usize::from(addr.index)).copied().ok_or_else(|| {
            TransportError::malformed(
                format!("read_discrete_input {}", addr),
                format!("index outside bank of {}", bank.len()),
            )
        })
    }

    /// Switch a coil.
    pub async fn write_coil(&self, unit: u8, index: u16, value: bool) -> LinkResult<()> {
        self.submit(Request::WriteCoil { unit, index, value })
            .await
            .map(|_| ())
    }

    /// Read a single holding register.
    pub async fn read_register(&self, unit: u8, index: u16) -> LinkResult<u16> {
        let words = self.read_registers(unit, index, 1).await?;
        words.first().copied().ok_or_else(|| {
            TransportError::malformed(format!("read_register {}:{}", unit, index), "empty reply")
        })
    }

    /// Read `count` consecutive holding registers.
    pub async fn read_registers(&self, unit: u8, start: u16, count: u16) -> LinkResult<Vec<u16>> {
        let request = Request::ReadRegisters { unit, start, count };
        match self.submit(request).await? {
            Reply::Words(words) => Ok(words),
            _ => Err(TransportError::malformed(request.describe(), "expected words")),
        }
    }

    /// Write a single holding register.
    pub async fn write_register(&self, unit: u8, index: u16, value: u16) -> LinkResult<()> {
        self.submit(Request::WriteRegister { unit, index, value })
            .await
            .map(|_| ())
    }

    /// Snapshot of the worker counters.
    pub fn snapshot(&self) -> TransportSnapshot {
        TransportSnapshot {
            endpoint: self.endpoint.to_string(),
            connected: self.stats.connected.load(Ordering::Relaxed),
            operations: self.stats.operations.load(Ordering::Relaxed),
            failures: self.stats.failures.load(Ordering::Relaxed),
            connects: self.stats.connects.load(Ordering::Relaxed),
            last_error: self.stats.last_error.lock().ok().and_then(|e| e.clone()),
        }
    }

    /// Human-readable transport status.
    pub fn format_status(&self) -> String {
        let s = self.snapshot();
        let mut text = format!(
            "Field bus {}: {}\nOperations: {} ({} failed), connections opened: {}",
            s.endpoint,
            if s.connected { "connected" } else { "disconnected" },
            s.operations,
            s.failures,
            s.connects
        );
        if let Some(err) = s.last_error {
            text.push_str(&format!("\nLast error: {}", err));
        }
        text
    }
}

struct Worker {
    connector: Box<dyn BusConnector>,
    link: Option<Box<dyn BusLink>>,
    options: TransportOptions,
    stats: Arc<TransportStats>,
}

impl Worker {
    async fn run(mut self, mut rx: mpsc::Receiver<Job>) {
        debug!("Transport worker started for {}", self.connector.endpoint());
        while let Some(job) = rx.recv().await {
            let result = self.execute(job.request).await;
            // The caller may have gone away; the operation still happened.
            let _ = job.reply.send(result);
            sleep(self.options.settle_delay).await;
        }
        debug!("Transport worker for {} stopped", self.connector.endpoint());
    }

    async fn execute(&mut self, request: Request) -> LinkResult<Reply> {
        self.stats.operations.fetch_add(1, Ordering::Relaxed);

        let result = match self.ensure_link().await {
            Ok(()) => self.dispatch(request).await,
            Err(e) => Err(e),
        };

        if let Err(e) = &result {
            self.stats.record_failure(e);
            if e.invalidates_link() && self.link.take().is_some() {
                self.stats.connected.store(false, Ordering::Relaxed);
                warn!("Dropping field bus link after failure: {}", e);
            } else {
                debug!("{} failed: {}", request.describe(), e);
            }
        }
        result
    }

    async fn ensure_link(&mut self) -> LinkResult<()> {
        if self.link.is_some() {
            return Ok(());
        }

        let endpoint = self.connector.endpoint();
        let duration = self.options.operation_timeout;
        let link = timeout(duration, self.connector.connect())
            .await
            .map_err(|_| TransportError::timeout(format!("connect to {}", endpoint), duration))??;

        self.link = Some(link);
        self.stats.connects.fetch_add(1, Ordering::Relaxed);
        self.stats.connected.store(true, Ordering::Relaxed);
        info!("Field bus link established to {}", endpoint);
        Ok(())
    }

    async fn dispatch(&mut self, request: Request) -> LinkResult<Reply> {
        let Some(link) = self.link.as_mut() else {
            return Err(TransportError::io(request.describe(), "no link"));
        };
        let duration = self.options.operation_timeout;

        let operation = async {
            match request {
                Request::ReadDiscreteInputs { unit, count } => link
                    .read_discrete_inputs(unit, 0, count)
                    .await
                    .map(Reply::Bits),
                Request::ReadCoils { unit, count } => {
                    link.read_coils(unit, 0, count).await.map(Reply::Bits)
                }
                Request::WriteCoil { unit, index, value } => {
                    link.write_coil(unit, index, value).await.map(|_| Reply::Done)
                }
                Request::ReadRegisters { unit, start, count } => link
                    .read_holding_registers(unit, start, count)
                    .await
                    .map(Reply::Words),
                Request::WriteRegister { unit, index, value } => link
                    .write_register(unit, index, value)
                    .await
                    .map(|_| Reply::Done),
            }
        };

        timeout(duration, operation)
            .await
            .unwrap_or_else(|_| Err(TransportError::timeout(request.describe(), duration)))
    }
}
