//! `Transport` over a Modbus RTU serial link.
//!
//! Framing, CRC and retries belong to `tokio-modbus`; this adapter only opens
//! the port for a product and folds the client's errors into
//! [`TransportError`].

use crate::product::{Product, WriteFunction};
use crate::transport::{Transport, TransportError};
use std::io;
use std::time::Duration;
use tokio_modbus::client::sync::{self, Reader, Writer};
use tokio_modbus::{ExceptionCode, Slave};
use tracing::debug;

/// Response time-out used for every request.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(1);

pub struct ModbusTransport {
    ctx: sync::Context,
    write_function: WriteFunction,
}

impl ModbusTransport {
    /// Opens `port_name` with the product's baud rate and unit address.
    pub fn open(port_name: &str, product: &Product) -> io::Result<Self> {
        Self::open_with(port_name, product.baud_rate, product)
    }

    /// Like [`ModbusTransport::open`] but with an explicit baud rate.
    pub fn open_with(port_name: &str, baud_rate: u32, product: &Product) -> io::Result<Self> {
        debug!(
            "Connecting to {} at {} baud and RS485 address {}",
            port_name, baud_rate, product.unit_id
        );
        let builder = tokio_serial::new(port_name, baud_rate);
        let ctx = sync::rtu::connect_slave_with_timeout(
            &builder,
            Slave(product.unit_id),
            Some(DEFAULT_TIMEOUT),
        )?;
        Ok(Self {
            ctx,
            write_function: product.write_function,
        })
    }
}

fn map_exception(address: u16, code: ExceptionCode) -> TransportError {
    match code {
        ExceptionCode::IllegalDataAddress | ExceptionCode::IllegalFunction => {
            TransportError::IllegalAddress(address)
        }
        other => TransportError::MalformedResponse(format!("exception {:?}", other)),
    }
}

fn map_error(err: tokio_modbus::Error) -> TransportError {
    match err {
        tokio_modbus::Error::Transport(io_err)
            if matches!(
                io_err.kind(),
                io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock
            ) =>
        {
            TransportError::NoResponse
        }
        other => TransportError::MalformedResponse(other.to_string()),
    }
}

/// Flattens the client's nested result.
fn flatten<T>(
    address: u16,
    result: Result<Result<T, ExceptionCode>, tokio_modbus::Error>,
) -> Result<T, TransportError> {
    match result {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(code)) => Err(map_exception(address, code)),
        Err(err) => Err(map_error(err)),
    }
}

impl Transport for ModbusTransport {
    fn read_one(&mut self, address: u16) -> Result<u16, TransportError> {
        let words = self.read_many(address, 1)?;
        words.first().copied().ok_or_else(|| {
            TransportError::MalformedResponse("empty register response".to_string())
        })
    }

    fn read_many(&mut self, address: u16, count: u16) -> Result<Vec<u16>, TransportError> {
        debug!("read {} register(s) at {}", count, address);
        let words = flatten(address, self.ctx.read_holding_registers(address, count))?;
        if words.len() != count as usize {
            return Err(TransportError::MalformedResponse(format!(
                "expected {} registers, got {}",
                count,
                words.len()
            )));
        }
        Ok(words)
    }

    fn write_one(&mut self, address: u16, word: u16) -> Result<(), TransportError> {
        debug!(
            "write {} to {} (function {:#04x})",
            word,
            address,
            self.write_function.code()
        );
        let result = match self.write_function {
            WriteFunction::Single => self.ctx.write_single_register(address, word),
            WriteFunction::Multiple => self.ctx.write_multiple_registers(address, &[word]),
        };
        flatten(address, result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn illegal_address_exceptions() {
        assert_eq!(
            map_exception(7, ExceptionCode::IllegalDataAddress),
            TransportError::IllegalAddress(7)
        );
        assert_eq!(
            map_exception(7, ExceptionCode::IllegalFunction),
            TransportError::IllegalAddress(7)
        );
        assert!(map_exception(7, ExceptionCode::ServerDeviceBusy).is_transient());
    }

    #[test]
    fn timeouts_are_no_response() {
        let err = tokio_modbus::Error::Transport(io::Error::from(io::ErrorKind::TimedOut));
        assert_eq!(map_error(err), TransportError::NoResponse);

        let err = tokio_modbus::Error::Transport(io::Error::from(io::ErrorKind::InvalidData));
        assert!(matches!(map_error(err), TransportError::MalformedResponse(_)));
    }
}
