//! The register transport seam and an in-memory device behind it.

use std::collections::{HashMap, VecDeque};
use thiserror::Error;

/// Failures reported by a transport for one operation.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum TransportError {
    /// The device rejected the address. Treated as a script bug.
    #[error("illegal address {0}")]
    IllegalAddress(u16),
    /// Nothing came back before the time-out.
    #[error("no response from device")]
    NoResponse,
    /// Something came back but could not be used.
    #[error("malformed response: {0}")]
    MalformedResponse(String),
}

impl TransportError {
    /// Transient bus conditions that a running session tolerates.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            TransportError::NoResponse | TransportError::MalformedResponse(_)
        )
    }
}

/// Synchronous access to a device's 16-bit register file.
pub trait Transport {
    fn read_one(&mut self, address: u16) -> Result<u16, TransportError>;

    fn read_many(&mut self, address: u16, count: u16) -> Result<Vec<u16>, TransportError>;

    fn write_one(&mut self, address: u16, word: u16) -> Result<(), TransportError>;
}

impl<T: Transport + ?Sized> Transport for &mut T {
    fn read_one(&mut self, address: u16) -> Result<u16, TransportError> {
        (**self).read_one(address)
    }

    fn read_many(&mut self, address: u16, count: u16) -> Result<Vec<u16>, TransportError> {
        (**self).read_many(address, count)
    }

    fn write_one(&mut self, address: u16, word: u16) -> Result<(), TransportError> {
        (**self).write_one(address, word)
    }
}

/// A transport call, as recorded by [`MemoryTransport`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    ReadOne(u16),
    ReadMany(u16, u16),
    WriteOne(u16, u16),
}

/// Simulated device: a sparse register file plus a queue of diagnostic log
/// entries.
///
/// Reading any address that was never defined fails with `IllegalAddress`,
/// like the real firmware. Reading 8 words at the log address pops the next
/// queued entry, or returns the empty-log sentinel.
#[derive(Debug, Default, Clone)]
pub struct MemoryTransport {
    registers: HashMap<u16, u16>,
    log_address: Option<u16>,
    log_entries: VecDeque<[u16; 8]>,
    faults: VecDeque<TransportError>,
    calls: Vec<Call>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Defines every address of `map`, initialised to zero.
    pub fn for_map(map: &crate::catalog::RegisterMap) -> Self {
        let mut transport = Self::new();
        for (_, address) in map.iter() {
            transport.registers.insert(address, 0);
        }
        if let Ok(address) = map.resolve(crate::frame::LOG_LEVEL_REGISTER) {
            transport.log_address = Some(address);
        }
        transport
    }

    /// Defines (or overwrites) one register.
    pub fn set(&mut self, address: u16, word: u16) -> &mut Self {
        self.registers.insert(address, word);
        self
    }

    pub fn get(&self, address: u16) -> Option<u16> {
        self.registers.get(&address).copied()
    }

    /// Queues a log entry to be returned by the next log read.
    pub fn queue_log(&mut self, words: [u16; 8]) -> &mut Self {
        self.log_entries.push_back(words);
        self
    }

    /// Makes the next call fail with `error`, before touching any register.
    pub fn fail_next(&mut self, error: TransportError) -> &mut Self {
        self.faults.push_back(error);
        self
    }

    /// Every call made so far, in order.
    pub fn calls(&self) -> &[Call] {
        &self.calls
    }

    fn word(&self, address: u16) -> Result<u16, TransportError> {
        self.get(address)
            .ok_or(TransportError::IllegalAddress(address))
    }
}

impl Transport for MemoryTransport {
    fn read_one(&mut self, address: u16) -> Result<u16, TransportError> {
        self.calls.push(Call::ReadOne(address));
        if let Some(fault) = self.faults.pop_front() {
            return Err(fault);
        }
        self.word(address)
    }

    fn read_many(&mut self, address: u16, count: u16) -> Result<Vec<u16>, TransportError> {
        self.calls.push(Call::ReadMany(address, count));
        if let Some(fault) = self.faults.pop_front() {
            return Err(fault);
        }

        if self.log_address == Some(address) && count == 8 {
            let entry = self
                .log_entries
                .pop_front()
                .unwrap_or([crate::frame::EMPTY_LOG_LEVEL, 0, 0, 0, 0, 0, 0, 0]);
            return Ok(entry.to_vec());
        }

        (0..count)
            .map(|offset| {
                let target = address
                    .checked_add(offset)
                    .ok_or(TransportError::IllegalAddress(address))?;
                self.word(target)
            })
            .collect()
    }

    fn write_one(&mut self, address: u16, word: u16) -> Result<(), TransportError> {
        self.calls.push(Call::WriteOne(address, word));
        if let Some(fault) = self.faults.pop_front() {
            return Err(fault);
        }
        self.word(address)?;
        self.registers.insert(address, word);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::RegisterMap;

    #[test]
    fn undefined_addresses_are_illegal() {
        let mut device = MemoryTransport::new();
        device.set(10, 7);
        assert_eq!(device.read_one(10), Ok(7));
        assert_eq!(device.read_one(11), Err(TransportError::IllegalAddress(11)));
        assert_eq!(
            device.read_many(10, 2),
            Err(TransportError::IllegalAddress(11))
        );
        assert_eq!(
            device.write_one(12, 1),
            Err(TransportError::IllegalAddress(12))
        );
    }

    #[test]
    fn writes_are_visible_to_reads() {
        let mut device = MemoryTransport::new();
        device.set(3, 0).set(4, 0);
        device.write_one(4, 99).unwrap();
        assert_eq!(device.read_many(3, 2), Ok(vec![0, 99]));
        assert_eq!(
            device.calls(),
            &[Call::WriteOne(4, 99), Call::ReadMany(3, 2)]
        );
    }

    #[test]
    fn injected_faults_come_first() {
        let mut device = MemoryTransport::new();
        device.set(1, 5).fail_next(TransportError::NoResponse);
        assert_eq!(device.read_one(1), Err(TransportError::NoResponse));
        assert_eq!(device.read_one(1), Ok(5));
    }

    #[test]
    fn log_reads_pop_queued_entries() {
        let map = RegisterMap::new([("LOG_LEVEL", 5), ("LOG_CODE", 6)]).unwrap();
        let mut device = MemoryTransport::for_map(&map);
        device.queue_log([2, 2, 1, 4, 2, 0, 0, 0]);
        assert_eq!(device.read_many(5, 8), Ok(vec![2, 2, 1, 4, 2, 0, 0, 0]));
        assert_eq!(device.read_many(5, 8).unwrap()[0], 0x0F);
    }

    #[test]
    fn transient_classification() {
        assert!(TransportError::NoResponse.is_transient());
        assert!(TransportError::MalformedResponse("crc".into()).is_transient());
        assert!(!TransportError::IllegalAddress(3).is_transient());
    }
}
