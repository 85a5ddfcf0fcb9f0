//! Client settings, optionally loaded from a TOML file.
//!
//! ```toml
//! product = "24VDC HyPR 6000 (20-0104024)"
//! log_interval_ms = 80
//! flush_every = 100
//! timestamp = true
//!
//! [[products]]
//! name = "Bench controller"
//! baud_rate = 19200
//! unit_id = 2
//! write_function = "single"
//! registers = [
//!     { name = "LOG_LEVEL", address = 5 },
//!     { name = "BUS_VOLTAGE", address = 45 },
//! ]
//! ```

use crate::catalog::{CatalogError, RegisterMap};
use crate::product::{Product, ProductSet, WriteFunction};
use crate::session::{Session, SessionError};
use serde::Deserialize;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_LOG_INTERVAL_MS: u64 = 80;
pub const MAX_LOG_INTERVAL_MS: u64 = 1000;
pub const DEFAULT_FLUSH_EVERY: usize = 100;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("product '{product}': {source}")]
    Catalog {
        product: String,
        #[source]
        source: CatalogError,
    },
    #[error(transparent)]
    Session(#[from] SessionError),
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RegisterConfig {
    pub name: String,
    pub address: u16,
}

/// A product defined in the config file rather than built in.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ProductConfig {
    pub name: String,
    pub baud_rate: u32,
    #[serde(default = "default_unit_id")]
    pub unit_id: u8,
    #[serde(default = "default_write_function")]
    pub write_function: WriteFunction,
    pub registers: Vec<RegisterConfig>,
}

fn default_unit_id() -> u8 {
    1
}

fn default_write_function() -> WriteFunction {
    WriteFunction::Single
}

impl ProductConfig {
    pub fn to_product(&self) -> Result<Product, ConfigError> {
        let registers = RegisterMap::new(
            self.registers
                .iter()
                .map(|register| (register.name.clone(), register.address)),
        )
        .map_err(|source| ConfigError::Catalog {
            product: self.name.clone(),
            source,
        })?;
        Ok(Product::new(
            self.name.clone(),
            self.baud_rate,
            self.unit_id,
            self.write_function,
            registers,
        ))
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Active product; the first known product when unset.
    pub product: Option<String>,
    pub port: Option<String>,
    /// Overrides the product's baud rate.
    pub baud_rate: Option<u32>,
    /// Decoded log lines are appended here when set.
    pub log_file: Option<PathBuf>,
    pub log_interval_ms: u64,
    pub flush_every: usize,
    pub timestamp: bool,
    pub products: Vec<ProductConfig>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            product: None,
            port: None,
            baud_rate: None,
            log_file: None,
            log_interval_ms: DEFAULT_LOG_INTERVAL_MS,
            flush_every: DEFAULT_FLUSH_EVERY,
            timestamp: false,
            products: Vec::new(),
        }
    }
}

impl ClientConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        let interval = config.log_interval_ms;
        let flush_every = config.flush_every;
        Ok(config
            .with_log_interval_ms(interval)
            .with_flush_every(flush_every))
    }

    pub fn with_product(mut self, product: impl Into<String>) -> Self {
        self.product = Some(product.into());
        self
    }

    pub fn with_port(mut self, port: impl Into<String>) -> Self {
        self.port = Some(port.into());
        self
    }

    pub fn with_baud_rate(mut self, baud_rate: u32) -> Self {
        self.baud_rate = Some(baud_rate);
        self
    }

    pub fn with_log_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.log_file = Some(path.into());
        self
    }

    /// Clamped to `0..=1000` ms.
    pub fn with_log_interval_ms(mut self, interval_ms: u64) -> Self {
        self.log_interval_ms = interval_ms.min(MAX_LOG_INTERVAL_MS);
        self
    }

    pub fn with_flush_every(mut self, writes: usize) -> Self {
        self.flush_every = writes.max(1);
        self
    }

    pub fn with_timestamp(mut self, timestamp: bool) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn log_interval(&self) -> Duration {
        Duration::from_millis(self.log_interval_ms)
    }

    /// Built-in products followed by the configured ones.
    pub fn product_set(&self) -> Result<ProductSet, ConfigError> {
        let mut set = ProductSet::builtin();
        for entry in &self.products {
            set.add(entry.to_product()?)
                .map_err(|source| ConfigError::Catalog {
                    product: entry.name.clone(),
                    source,
                })?;
        }
        Ok(set)
    }

    pub fn session(&self) -> Result<Session, ConfigError> {
        let products = self.product_set()?;
        let session = match &self.product {
            Some(name) => Session::with_product(products, name)?,
            None => Session::new(products)?,
        };
        Ok(session)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const BENCH: &str = r#"
product = "Bench controller"
log_interval_ms = 5000
flush_every = 0
timestamp = true

[[products]]
name = "Bench controller"
baud_rate = 19200
unit_id = 2
write_function = "multiple"
registers = [
    { name = "LOG_LEVEL", address = 5 },
    { name = "BUS_VOLTAGE", address = 45 },
]
"#;

    #[test]
    fn defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.log_interval(), Duration::from_millis(80));
        assert_eq!(config.flush_every, 100);
        assert!(!config.timestamp);
        let session = config.session().unwrap();
        assert_eq!(session.product().name, "24VDC HyPR 6000 (20-0104024)");
    }

    #[test]
    fn empty_file_is_default() {
        assert_eq!(ClientConfig::from_toml_str("").unwrap(), ClientConfig::default());
    }

    #[test]
    fn load_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(BENCH.as_bytes()).unwrap();

        let config = ClientConfig::load(file.path()).unwrap();
        assert_eq!(config.log_interval_ms, 1000);
        assert_eq!(config.flush_every, 1);
        assert!(config.timestamp);

        let session = config.session().unwrap();
        let product = session.product();
        assert_eq!(product.name, "Bench controller");
        assert_eq!(product.baud_rate, 19200);
        assert_eq!(product.unit_id, 2);
        assert_eq!(product.write_function, WriteFunction::Multiple);
        assert_eq!(session.resolve_register("BUS_VOLTAGE"), Ok(45));
        assert_eq!(session.products().len(), 3);
    }

    #[test]
    fn builder_overrides() {
        let config = ClientConfig::default()
            .with_product("24VDC PRO-Verter 5000-220 AFF1 (20-0104033)")
            .with_port("/dev/ttyUSB0")
            .with_baud_rate(38400)
            .with_log_file("log.txt")
            .with_log_interval_ms(1500)
            .with_timestamp(true);
        assert_eq!(config.port.as_deref(), Some("/dev/ttyUSB0"));
        assert_eq!(config.baud_rate, Some(38400));
        assert_eq!(config.log_file, Some(PathBuf::from("log.txt")));
        assert_eq!(config.log_interval_ms, 1000);
        assert!(config.session().unwrap().resolve_register("Control").is_ok());
    }

    #[test]
    fn duplicate_addresses_are_rejected() {
        let text = r#"
[[products]]
name = "broken"
baud_rate = 9600
registers = [
    { name = "A", address = 1 },
    { name = "B", address = 1 },
]
"#;
        let config = ClientConfig::from_toml_str(text).unwrap();
        let err = config.product_set().unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Catalog {
                source: CatalogError::DuplicateAddress { address: 1, .. },
                ..
            }
        ));
    }

    #[test]
    fn duplicate_product_names_are_rejected() {
        let text = r#"
[[products]]
name = "24VDC HyPR 6000 (20-0104024)"
baud_rate = 9600
registers = []
"#;
        let err = ClientConfig::from_toml_str(text)
            .unwrap()
            .product_set()
            .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Catalog {
                source: CatalogError::DuplicateName(_),
                ..
            }
        ));
    }

    #[test]
    fn unknown_active_product() {
        let err = ClientConfig::default()
            .with_product("missing")
            .session()
            .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Session(SessionError::UnknownProduct(_))
        ));
    }

    #[test]
    fn bad_toml_and_missing_file() {
        assert!(matches!(
            ClientConfig::from_toml_str("log_interval_ms = \"fast\""),
            Err(ConfigError::Parse(_))
        ));
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            ClientConfig::load(&dir.path().join("absent.toml")),
            Err(ConfigError::Io { .. })
        ));
    }
}
