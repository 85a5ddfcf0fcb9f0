//! # Modbus Remote Client Library
//!
//! Core logic for talking to power controllers over their Modbus register
//! interface: a register-command script interpreter and a decoder for the
//! 8-word diagnostic log entries the controllers keep. Product differences
//! (register maps, serial settings) are data, carried by [`Product`].
//!
//! The binary drives everything through a [`Session`] and a [`Transport`],
//! either [`ModbusTransport`] on a serial port or the in-memory
//! [`MemoryTransport`] device.

pub mod assertion;
pub mod catalog;
pub mod config;
pub mod frame;
pub mod log_sink;
pub mod modbus;
pub mod product;
pub mod script;
pub mod session;
pub mod token;
pub mod transport;

pub use assertion::{Assertion, AssertionError, Value};
pub use catalog::{CatalogError, RegisterMap};
pub use config::{ClientConfig, ConfigError};
pub use frame::{DecodedFrame, Field, FrameDecoder, LogFrame, Pgn};
pub use log_sink::{LogSink, SinkError};
pub use modbus::ModbusTransport;
pub use product::{Product, ProductSet, WriteFunction};
pub use script::{Interpreter, RunReport, ScriptCommand, ScriptError};
pub use session::{Session, SessionError};
pub use token::{coerce, Token};
pub use transport::{MemoryTransport, Transport, TransportError};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
