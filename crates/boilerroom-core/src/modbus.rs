//! Modbus TCP implementation of the bus link.

use std::net::SocketAddr;

use async_trait::async_trait;
use tokio_modbus::client::{Context, tcp};
use tokio_modbus::prelude::*;
use tracing::debug;

use crate::error::TransportError;
use crate::traits::{BusConnector, BusLink, LinkResult};

/// Opens Modbus TCP connections to a gateway.
///
/// The gateway serves every board on the bus; the board is selected per
/// request by its unit id.
#[derive(Debug, Clone)]
pub struct ModbusTcpConnector {
    endpoint: String,
}

impl ModbusTcpConnector {
    /// Create a connector for `host:port`.
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
        }
    }

    async fn resolve(&self) -> LinkResult<SocketAddr> {
        let mut addrs = tokio::net::lookup_host(self.endpoint.as_str())
            .await
            .map_err(|e| TransportError::connect(&self.endpoint, e))?;
        addrs
            .next()
            .ok_or_else(|| TransportError::connect(&self.endpoint, "no address resolved"))
    }
}

#[async_trait]
impl BusConnector for ModbusTcpConnector {
    async fn connect(&self) -> LinkResult<Box<dyn BusLink>> {
        let addr = self.resolve().await?;
        let ctx = tcp::connect(addr)
            .await
            .map_err(|e| TransportError::connect(&self.endpoint, e))?;
        debug!("Modbus link established to {}", addr);
        Ok(Box::new(ModbusTcpLink { ctx }))
    }

    fn endpoint(&self) -> String {
        self.endpoint.clone()
    }
}

/// One open Modbus TCP connection.
pub struct ModbusTcpLink {
    ctx: Context,
}

/// Collapse the nested transport/exception result of tokio-modbus.
fn flatten<T>(operation: String, result: tokio_modbus::Result<T>) -> LinkResult<T> {
    match result {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(exception)) => Err(TransportError::exception(operation, format!("{exception:?}"))),
        Err(e) => Err(TransportError::io(operation, e)),
    }
}

fn expect_len<T>(operation: String, values: Vec<T>, count: u16) -> LinkResult<Vec<T>> {
    if values.len() < usize::from(count) {
        return Err(TransportError::malformed(
            operation,
            format!("expected {} values, got {}", count, values.len()),
        ));
    }
    let mut values = values;
    values.truncate(usize::from(count));
    Ok(values)
}

#[async_trait]
impl BusLink for ModbusTcpLink {
    async fn read_discrete_inputs(
        &mut self,
        unit: u8,
        start: u16,
        count: u16,
    ) -> LinkResult<Vec<bool>> {
        let op = format!("read_discrete_inputs {}:{}+{}", unit, start, count);
        self.ctx.set_slave(Slave(unit));
        let values = flatten(op.clone(), self.ctx.read_discrete_inputs(start, count).await)?;
        expect_len(op, values, count)
    }

    async fn read_coils(&mut self, unit: u8, start: u16, count: u16) -> LinkResult<Vec<bool>> {
        let op = format!("read_coils {}:{}+{}", unit, start, count);
        self.ctx.set_slave(Slave(unit));
        let values = flatten(op.clone(), self.ctx.read_coils(start, count).await)?;
        expect_len(op, values, count)
    }

    async fn write_coil(&mut self, unit: u8, index: u16, value: bool) -> LinkResult<()> {
        let op = format!("write_coil {}:{}", unit, index);
        self.ctx.set_slave(Slave(unit));
        flatten(op, self.ctx.write_single_coil(index, value).await)
    }

    async fn read_holding_registers(
        &mut self,
        unit: u8,
        start: u16,
        count: u16,
    ) -> LinkResult<Vec<u16>> {
        let op = format!("read_holding_registers {}:{}+{}", unit, start, count);
        self.ctx.set_slave(Slave(unit));
        let values = flatten(op.clone(), self.ctx.read_holding_registers(start, count).await)?;
        expect_len(op, values, count)
    }

    async fn write_register(&mut self, unit: u8, index: u16, value: u16) -> LinkResult<()> {
        let op = format!("write_register {}:{}", unit, index);
        self.ctx.set_slave(Slave(unit));
        flatten(op, self.ctx.write_single_register(index, value).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connector_endpoint() {
        let connector = ModbusTcpConnector::new("192.168.1.50:502");
        assert_eq!(connector.endpoint(), "192.168.1.50:502");
    }

    #[test]
    fn test_expect_len_truncates_padding() {
        // Coil responses are byte-padded; extra bits are dropped.
        let values = vec![true, false, true, false, false, false, false, false];
        let trimmed = expect_len("read_coils 1:0+3".to_string(), values, 3).unwrap();
        assert_eq!(trimmed, vec![true, false, true]);
    }

    #[test]
    fn test_expect_len_short_response() {
        let err = expect_len("read_holding_registers 1:0+4".to_string(), vec![1u16, 2], 4)
            .unwrap_err();
        assert!(matches!(err, TransportError::Malformed { .. }));
        assert!(err.to_string().contains("expected 4 values, got 2"));
    }

    #[tokio::test]
    async fn test_connect_unresolvable_host() {
        let connector = ModbusTcpConnector::new("not a host");
        let err = connector.connect().await.err().unwrap();
        assert!(matches!(err, TransportError::Connect { .. }));
    }
}
