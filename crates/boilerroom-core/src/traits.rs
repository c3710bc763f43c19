//! Trait abstractions for field-bus links.
//!
//! [`BusLink`] is one established connection able to exchange frames;
//! [`BusConnector`] knows how to open one. The transport worker owns at most
//! one link at a time and asks its connector for a fresh one whenever the
//! previous link was lost. Both the Modbus TCP link and the mock bus used in
//! tests implement these traits.

use async_trait::async_trait;

use crate::error::TransportError;

/// Result of a single link operation.
pub type LinkResult<T> = std::result::Result<T, TransportError>;

/// An established field-bus connection.
///
/// Methods take `&mut self`: a link is owned by exactly one worker and never
/// shared, so frames cannot interleave.
#[async_trait]
pub trait BusLink: Send {
    /// Read `count` discrete inputs starting at `start`.
    async fn read_discrete_inputs(&mut self, unit: u8, start: u16, count: u16)
    -> LinkResult<Vec<bool>>;

    /// Read `count` coils starting at `start`.
    async fn read_coils(&mut self, unit: u8, start: u16, count: u16) -> LinkResult<Vec<bool>>;

    /// Write a single coil.
    async fn write_coil(&mut self, unit: u8, index: u16, value: bool) -> LinkResult<()>;

    /// Read `count` holding registers starting at `start`.
    async fn read_holding_registers(
        &mut self,
        unit: u8,
        start: u16,
        count: u16,
    ) -> LinkResult<Vec<u16>>;

    /// Write a single holding register.
    async fn write_register(&mut self, unit: u8, index: u16, value: u16) -> LinkResult<()>;
}

/// Factory for [`BusLink`]s.
#[async_trait]
pub trait BusConnector: Send + Sync {
    /// Open a new link.
    async fn connect(&self) -> LinkResult<Box<dyn BusLink>>;

    /// Human-readable endpoint description, used in logs and errors.
    fn endpoint(&self) -> String;
}
