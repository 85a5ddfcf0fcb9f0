//! Supported products and their register maps.

use crate::catalog::{CatalogError, RegisterMap};
use serde::Deserialize;
use std::sync::Arc;

/// Modbus function used for register writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WriteFunction {
    /// Function 0x06, write single register.
    Single,
    /// Function 0x10, write multiple registers (with a count of one).
    Multiple,
}

impl WriteFunction {
    pub fn code(self) -> u8 {
        match self {
            WriteFunction::Single => 0x06,
            WriteFunction::Multiple => 0x10,
        }
    }
}

/// Everything product-specific: serial settings, write function and the
/// register map.
#[derive(Debug, Clone, PartialEq)]
pub struct Product {
    pub name: String,
    pub baud_rate: u32,
    /// Modbus slave (unit) address.
    pub unit_id: u8,
    pub write_function: WriteFunction,
    pub registers: Arc<RegisterMap>,
}

impl Product {
    pub fn new(
        name: impl Into<String>,
        baud_rate: u32,
        unit_id: u8,
        write_function: WriteFunction,
        registers: RegisterMap,
    ) -> Self {
        Self {
            name: name.into(),
            baud_rate,
            unit_id,
            write_function,
            registers: Arc::new(registers),
        }
    }

    /// 24VDC HyPR 6000 auto generator start controller.
    pub fn hypr_6000() -> Self {
        Self::new(
            "24VDC HyPR 6000 (20-0104024)",
            57600,
            0x01,
            WriteFunction::Multiple,
            builtin_map(HYPR_6000_REGISTERS),
        )
    }

    /// 24VDC PRO-Verter 5000-220 inverter/charger.
    pub fn pro_verter_5000() -> Self {
        Self::new(
            "24VDC PRO-Verter 5000-220 AFF1 (20-0104033)",
            9600,
            0x01,
            WriteFunction::Single,
            builtin_map(PRO_VERTER_5000_REGISTERS),
        )
    }

    /// Built-in products, in menu order.
    pub fn builtin() -> Vec<Product> {
        vec![Self::hypr_6000(), Self::pro_verter_5000()]
    }
}

fn builtin_map(table: &[(&str, u16)]) -> RegisterMap {
    match RegisterMap::new(table.iter().copied()) {
        Ok(map) => map,
        // The tables below are static and covered by tests.
        Err(err) => unreachable!("built-in register table is invalid: {}", err),
    }
}

/// The products the client knows about, looked up by name.
#[derive(Debug, Clone)]
pub struct ProductSet {
    products: Vec<Arc<Product>>,
}

impl ProductSet {
    /// Starts from the built-in products.
    pub fn builtin() -> Self {
        Self {
            products: Product::builtin().into_iter().map(Arc::new).collect(),
        }
    }

    /// Adds a product; a name that already exists is rejected.
    pub fn add(&mut self, product: Product) -> Result<(), CatalogError> {
        if self.get(&product.name).is_some() {
            return Err(CatalogError::DuplicateName(product.name));
        }
        self.products.push(Arc::new(product));
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<Product>> {
        self.products.iter().find(|p| p.name == name).cloned()
    }

    pub fn first(&self) -> Option<Arc<Product>> {
        self.products.first().cloned()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Product>> {
        self.products.iter()
    }

    pub fn len(&self) -> usize {
        self.products.len()
    }

    pub fn is_empty(&self) -> bool {
        self.products.is_empty()
    }
}

// Must match the register list in the HyPR 6000 firmware.
// LOG_MSG_LEN is in bytes while LOG_VALUEn are 16-bit words.
// Voltages are in centivolts, delays in seconds, currents in amps.
const HYPR_6000_REGISTERS: &[(&str, u16)] = &[
    ("BIT", 0),
    ("TOTAL_ERRORS", 1),
    ("LOG_HEAD", 2),
    ("LOG_TAIL", 3),
    ("LOG_STATUS", 4),
    ("LOG_LEVEL", 5),
    ("LOG_CODE", 6),
    ("LOG_DEVICE", 7),
    ("LOG_MSG_LEN", 8),
    ("LOG_VALUE0", 9),
    ("LOG_VALUE1", 10),
    ("LOG_VALUE2", 11),
    ("LOG_VALUE3", 12),
    ("LOG1_LEVEL", 13),
    ("LOG1_CODE", 14),
    ("LOG1_DEVICE", 15),
    ("LOG1_MSG_LEN", 16),
    ("LOG1_VALUE0", 17),
    ("LOG1_VALUE1", 18),
    ("LOG1_VALUE2", 19),
    ("LOG1_VALUE3", 20),
    ("LOG2_LEVEL", 21),
    ("LOG2_CODE", 22),
    ("LOG2_DEVICE", 23),
    ("LOG2_MSG_LEN", 24),
    ("LOG2_VALUE0", 25),
    ("LOG2_VALUE1", 26),
    ("LOG2_VALUE2", 27),
    ("LOG2_VALUE3", 28),
    ("LOG3_LEVEL", 29),
    ("LOG3_CODE", 30),
    ("LOG3_DEVICE", 31),
    ("LOG3_MSG_LEN", 32),
    ("LOG3_VALUE0", 33),
    ("LOG3_VALUE1", 34),
    ("LOG3_VALUE2", 35),
    ("LOG3_VALUE3", 36),
    ("START_VOLTAGE", 37),
    ("START_DELAY", 38),
    ("STOP_VOLTAGE", 39),
    ("STOP_DELAY", 40),
    ("CRANK_TIMEOUT", 41),
    ("REGULATED_VOLTAGE", 42),
    ("MAX_CHARGING_CURRENT", 43),
    ("LVCO", 44),
    ("BUS_VOLTAGE", 45),
    ("CURRENTS", 46),
    ("GEN_CONTROL", 47),
    ("AGS_STATUS", 48),
    ("AC_INPUT", 49),
    ("AMMPS_RESPONSE", 50),
    ("GEN_WARMUP", 51),
    ("WARMUP_STATE", 52),
    ("GENERATOR_POWER_SETTINGS", 53),
    ("AVAILABLE_CURRENT", 54),
    ("CHARGER_MODE", 55),
    ("PID_KP", 56),
    ("PID_KI", 57),
    ("PID_KD", 58),
    ("PID_INPUT", 59),
    ("PID_OUTPUT", 60),
    ("PID_SET_POINT", 61),
    ("CHARGING_CURRENT_OFFSET", 62),
    ("REGULATED_CURRENT_OFFSET", 63),
    ("VERSION", 64),
    ("TOTAL_REGS_SIZE", 65),
];

const PRO_VERTER_5000_REGISTERS: &[(&str, u16)] = &[
    ("Absorb time", 0x2E),
    ("Absorb exit amps", 0x2F),
    ("Bulk current", 0x30),
    ("Absorb voltage", 0x31),
    ("Equalization voltage", 0x32),
    ("Floating voltage", 0x33),
    ("Temperature compensation", 0x34),
    ("Battery low voltage", 0x35),
    ("Battery over voltage", 0x36),
    ("Low voltage alarm", 0x37),
    ("Reset voltage", 0x38),
    ("Low voltage detect time", 0x39),
    ("Low voltage cut off time", 0x3A),
    ("Charge mode (equalization)", 0x3B),
    ("Mode (Online mode)", 0x3C),
    ("Online option", 0x3D),
    ("Reset to Bulk stage", 0x3E),
    ("Charging profile", 0x3F),
    ("Default frequency", 0x40),
    ("Grid input max current", 0x41),
    ("Low frequency cut off", 0x42),
    ("Low frequency reset", 0x43),
    ("High frequency cut off", 0x44),
    ("High frequency reset", 0x45),
    ("Low voltage reset", 0x46),
    ("Low voltage cut off 1", 0x47),
    ("Low voltage cut off 2", 0x48),
    ("Low voltage cut off 3", 0x49),
    ("Low voltage detect time 1", 0x4A),
    ("Low voltage detect time 2", 0x4B),
    ("Low voltage detect time 3", 0x4C),
    ("High voltage reset", 0x4D),
    ("High voltage cut off 1", 0x4E),
    ("High voltage cut off 2", 0x4F),
    ("High voltage cut off 3", 0x50),
    ("High voltage detect time 1", 0x51),
    ("High voltage detect time 2", 0x52),
    ("High voltage detect time 3", 0x53),
    ("Gen input maximum current", 0x54),
    ("GS detect time", 0x55),
    ("GEN ON time", 0x56),
    ("GEN OFF delay", 0x57),
    ("Battery type", 0x58),
    ("Input OC Protection", 0x59),
    ("Input Recovery", 0x5A),
    ("Sync. Grid", 0x5B),
    ("Sync. GEN", 0x5C),
    ("Safe Charging", 0x5D),
    ("External Charger", 0x5F),
    ("Power saving", 0x60),
    ("Enter point", 0x61),
    ("Wake up point", 0x62),
    ("Remote switch", 0x63),
    ("Relay function", 0x64),
    ("Comm. ID", 0x65),
    ("Buzzer", 0x66),
    ("Discharge beep", 0x67),
    ("Default reset", 0x68),
    ("Data log time", 0x69),
    ("Temperature unit", 0x6B),
    ("Password disable", 0x6C),
    ("Remote switch delay time", 0x6D),
    ("Status of GEN input", 0x100),
    ("Frequency of GEN input", 0x101),
    ("Voltage of GEN input", 0x102),
    ("Status of Grid input", 0x103),
    ("Frequency of Grid input", 0x104),
    ("Voltage of Grid input", 0x105),
    ("Input current", 0x106),
    ("Input VA", 0x108),
    ("Input watt", 0x10A),
    ("Output frequency", 0x10C),
    ("Output voltage", 0x10D),
    ("Invert/Charge current", 0x10E),
    ("Invert/Charge VA", 0x110),
    ("Invert/Charge watt", 0x112),
    ("Battery voltage", 0x114),
    ("Battery current", 0x115),
    ("External current", 0x116),
    ("Battery temperature", 0x117),
    ("Transformer temperature", 0x118),
    ("Bus bar temperature", 0x119),
    ("Heat sink temperature", 0x11A),
    ("Fan speed", 0x11B),
    ("Operating mode", 0x11C),
    ("Error code", 0x11D),
    ("Charge stage", 0x11E),
    ("Version", 0x11F),
    ("Compensating voltage", 0x120),
    ("Control", 0x200),
];
