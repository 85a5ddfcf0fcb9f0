//! The client session: the active product plus every operation the driver
//! calls.
//!
//! Each operation clones the active product's `Arc` when it starts, so a
//! product switch is a single pointer replacement and work already handed
//! out (an [`Interpreter`] running on another thread, a [`FrameDecoder`] in
//! the monitor) keeps the map it started with.

use crate::catalog::CatalogError;
use crate::frame::{DecodedFrame, FrameDecoder, LogFrame, LOG_ENTRY_WORDS, LOG_LEVEL_REGISTER};
use crate::product::{Product, ProductSet};
use crate::script::{Interpreter, RunReport, ScriptCommand};
use crate::transport::{Transport, TransportError};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Error, PartialEq)]
pub enum SessionError {
    #[error("no products configured")]
    NoProducts,
    #[error("unknown product '{0}'")]
    UnknownProduct(String),
    #[error(transparent)]
    Catalog(#[from] CatalogError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("could not connect for {product}: {reason}")]
    Reconnect { product: String, reason: String },
}

#[derive(Debug, Clone)]
pub struct Session {
    products: ProductSet,
    active: Arc<Product>,
}

impl Session {
    /// Starts on the first product of `products`.
    pub fn new(products: ProductSet) -> Result<Self, SessionError> {
        let active = products.first().ok_or(SessionError::NoProducts)?;
        Ok(Self { products, active })
    }

    /// Starts on the product called `name`.
    pub fn with_product(products: ProductSet, name: &str) -> Result<Self, SessionError> {
        let mut session = Self::new(products)?;
        session.switch_product(name)?;
        Ok(session)
    }

    pub fn products(&self) -> &ProductSet {
        &self.products
    }

    /// The active product.
    pub fn product(&self) -> Arc<Product> {
        Arc::clone(&self.active)
    }

    /// Makes `name` the active product. The previous product stays alive for
    /// as long as anything still holds it.
    pub fn switch_product(&mut self, name: &str) -> Result<Arc<Product>, SessionError> {
        let product = self
            .products
            .get(name)
            .ok_or_else(|| SessionError::UnknownProduct(name.to_string()))?;
        if product.name != self.active.name {
            info!("Switching product from {} to {}", self.active.name, product.name);
        }
        self.active = Arc::clone(&product);
        Ok(product)
    }

    /// Switches to `name` and reopens the connection through `open`.
    ///
    /// The old connection is dropped before `open` runs, since a serial port
    /// can only be held once. If the new product cannot connect, the session
    /// stays on the previous product and `connection` is reopened for it
    /// (left `None` when that fails too).
    pub fn switch_and_reconnect<C, F>(
        &mut self,
        name: &str,
        connection: &mut Option<C>,
        mut open: F,
    ) -> Result<Arc<Product>, SessionError>
    where
        F: FnMut(&Product) -> Result<C, String>,
    {
        let next = self
            .products
            .get(name)
            .ok_or_else(|| SessionError::UnknownProduct(name.to_string()))?;

        drop(connection.take());
        match open(next.as_ref()) {
            Ok(opened) => {
                *connection = Some(opened);
                self.switch_product(name)
            }
            Err(reason) => {
                warn!("Could not connect for {}: {}", next.name, reason);
                match open(self.active.as_ref()) {
                    Ok(reopened) => *connection = Some(reopened),
                    Err(err) => warn!("Could not reconnect for {}: {}", self.active.name, err),
                }
                Err(SessionError::Reconnect {
                    product: next.name.clone(),
                    reason,
                })
            }
        }
    }

    /// An interpreter bound to the current register map.
    pub fn interpreter(&self) -> Interpreter {
        Interpreter::new(Arc::clone(&self.active.registers))
    }

    /// A decoder bound to the current register map.
    pub fn decoder(&self) -> FrameDecoder {
        FrameDecoder::new(Arc::clone(&self.active.registers))
    }

    pub fn interpret_script<T>(&self, text: &str, transport: &mut T) -> RunReport
    where
        T: Transport + ?Sized,
    {
        self.interpreter().run(text, transport)
    }

    /// Runs a single command and returns its report line.
    pub fn execute_command<T>(&self, command: &ScriptCommand, transport: &mut T) -> String
    where
        T: Transport + ?Sized,
    {
        self.interpreter().execute(command, transport).text
    }

    pub fn decode_frame(&self, frame: &LogFrame, with_timestamp: bool) -> DecodedFrame {
        self.decoder().decode(frame, with_timestamp)
    }

    pub fn resolve_register(&self, name: &str) -> Result<u16, CatalogError> {
        self.active.registers.resolve(name)
    }

    pub fn reverse_register(&self, address: u16) -> Option<String> {
        self.active.registers.reverse(address)
    }

    /// Reads the current log entry. `None` when the device has nothing new.
    pub fn poll_log<T>(&self, transport: &mut T) -> Result<Option<LogFrame>, SessionError>
    where
        T: Transport + ?Sized,
    {
        let address = self.resolve_register(LOG_LEVEL_REGISTER)?;
        let words = transport.read_many(address, LOG_ENTRY_WORDS as u16)?;
        let frame = LogFrame::from_slice(&words).ok_or_else(|| {
            TransportError::MalformedResponse(format!("log entry of {} words", words.len()))
        })?;
        if frame.is_empty_marker() {
            return Ok(None);
        }
        debug!("log entry {:?}", frame.to_words());
        Ok(Some(frame))
    }
}
