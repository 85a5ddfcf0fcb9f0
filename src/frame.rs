//! Decoding of diagnostic log entries.
//!
//! The controller keeps a circular log of 8-word entries that mirror traffic
//! on its internal J1939 bus. Each entry is tagged with a code (mostly a PGN)
//! that selects how the four value words are laid out. Decoding is a pure
//! function of one entry plus the static tables below and the active
//! register map; it never fails, it marks what it could not interpret.

use crate::catalog::RegisterMap;
use chrono::{DateTime, Local};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Words in one log entry.
pub const LOG_ENTRY_WORDS: usize = 8;
/// Register holding the first word of the current log entry.
pub const LOG_LEVEL_REGISTER: &str = "LOG_LEVEL";
/// Level reported by the device when the log has nothing new.
pub const EMPTY_LOG_LEVEL: u16 = 0x0F;
/// Largest legal payload, in bytes.
pub const MAX_PAYLOAD_BYTES: u16 = 8;

pub const LOG_LEVELS: [&str; 16] = [
    "EMERG", "ALERT", "CRIT", "ERR", "WARNING", "NOTICE", "INFO", "DEBUG", "UNDEF", "UNDEF",
    "UNDEF", "UNDEF", "UNDEF", "UNDEF", "UNDEF", "NULL",
];

pub const DEVICES: [&str; 3] = ["CAN_A", "CAN_B", "RS485"];

const J1939_STATUSES: &[(u16, &str)] = &[
    (0, "ADDRESSCLAIM_INIT"),
    (1, "ADDRESSCLAIM_INPROGRESS"),
    (2, "NORMALDATATRAFFIC"),
    (3, "ADDRESSCLAIM_FAILED"),
];

const CHARGER_MODES: &[(u16, &str)] = &[(0, "Charging"), (1, "Standby"), (2, "Off"), (3, "Delay")];

const GENSET_STATUSES: &[(u16, &str)] = &[
    (0, "NOT READY TO CRANK"),
    (1, "READY TO CRANK"),
    (2, "DELAY TO CRANK - WTR KIT"),
    (3, "DELAY TO CRANK - GLW PLG"),
    (4, "CRANK"),
    (5, "RUNNING"),
    (6, "EMERGENCY STOP"),
    (7, "IDLE MODE"),
    (8, "POWERING DOWN"),
    (9, "FACTORY TEST"),
    (10, "DELAY TO CRANK - WINTER KIT TEST"),
    (11, "DELAY TO CRANK - WINTER KIT DETECT"),
    (12, "DELAY TO CRANK - ECM DATASAVE"),
    (13, "RUNNING - SYNCHRONIZING"),
    (14, "RUNNING - SYNCHRONIZED"),
    (15, "RUNNING - LOAD SHARE"),
];

const CONTROL_SWITCH_POSITIONS: &[(u16, &str)] = &[
    (0, "Off"),
    (1, "Prime and run Aux fuel"),
    (2, "Prime and run"),
    (3, "Start"),
];

const WARMUP_STATES: &[(u16, &str)] = &[(0, "NoAC"), (1, "WarmingUp"), (2, "Running")];

const AC_INPUTS: &[(u16, &str)] = &[(0, "Not sensed"), (1, "Sensed")];

const GEN_CONTROLS: &[(u16, &str)] = &[(0, "Off"), (1, "Auto"), (5, "On")];

fn lookup(table: &[(u16, &'static str)], raw: u16) -> Option<&'static str> {
    table
        .iter()
        .find(|(key, _)| *key == raw)
        .map(|(_, name)| *name)
}

/// One raw log entry: `[level, code, device, byte_count, value0..value3]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogFrame {
    pub level: u16,
    pub code: u16,
    /// Device index in the low byte, node/source address in the high byte.
    pub device: u16,
    /// Payload length in bytes; the values are words.
    pub byte_count: u16,
    pub values: [u16; 4],
}

impl LogFrame {
    pub fn from_words(words: [u16; LOG_ENTRY_WORDS]) -> Self {
        Self {
            level: words[0],
            code: words[1],
            device: words[2],
            byte_count: words[3],
            values: [words[4], words[5], words[6], words[7]],
        }
    }

    /// Builds a frame from a register read; `None` unless exactly 8 words.
    pub fn from_slice(words: &[u16]) -> Option<Self> {
        let words: [u16; LOG_ENTRY_WORDS] = words.try_into().ok()?;
        Some(Self::from_words(words))
    }

    pub fn to_words(&self) -> [u16; LOG_ENTRY_WORDS] {
        let [v0, v1, v2, v3] = self.values;
        [self.level, self.code, self.device, self.byte_count, v0, v1, v2, v3]
    }

    /// True when the device reported an idle log.
    pub fn is_empty_marker(&self) -> bool {
        self.level == EMPTY_LOG_LEVEL
    }

    pub fn device_index(&self) -> u8 {
        (self.device & 0x00FF) as u8
    }

    pub fn node(&self) -> u8 {
        (self.device >> 8) as u8
    }

    /// Payload bytes, big-endian within each word, limited to
    /// `min(byte_count, 8)`. An odd count takes the high byte of the next
    /// word.
    pub fn payload_bytes(&self) -> Vec<u8> {
        let count = self.byte_count.min(MAX_PAYLOAD_BYTES) as usize;
        (0..count)
            .map(|i| {
                let word = self.values[i / 2];
                if i % 2 == 0 {
                    (word >> 8) as u8
                } else {
                    (word & 0x00FF) as u8
                }
            })
            .collect()
    }
}

impl From<[u16; LOG_ENTRY_WORDS]> for LogFrame {
    fn from(words: [u16; LOG_ENTRY_WORDS]) -> Self {
        Self::from_words(words)
    }
}

/// Codes with a known name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pgn {
    Null,
    AddressClaimed,
    J1939Status,
    ActiveDtc,
    AdvDcsResponse,
    ControllerFirst,
    ControllerSecond,
    ControllerThird,
    ModbusRegisters,
}

impl Pgn {
    pub const ALL: [Pgn; 9] = [
        Pgn::Null,
        Pgn::AddressClaimed,
        Pgn::J1939Status,
        Pgn::ActiveDtc,
        Pgn::AdvDcsResponse,
        Pgn::ControllerFirst,
        Pgn::ControllerSecond,
        Pgn::ControllerThird,
        Pgn::ModbusRegisters,
    ];

    pub fn from_code(code: u16) -> Option<Self> {
        Self::ALL.into_iter().find(|pgn| pgn.code() == code)
    }

    pub fn code(self) -> u16 {
        match self {
            Pgn::Null => 0,
            Pgn::AddressClaimed => 1,
            Pgn::J1939Status => 2,
            Pgn::ActiveDtc => 0xFECA,
            Pgn::AdvDcsResponse => 0xFF17,
            Pgn::ControllerFirst => 0xFF15,
            Pgn::ControllerSecond => 0xFF19,
            Pgn::ControllerThird => 0xFF22,
            Pgn::ModbusRegisters => 0xFF23,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Pgn::Null => "null",
            Pgn::AddressClaimed => "ADDRESS_CLAIMED",
            Pgn::J1939Status => "J1939_STATUS",
            Pgn::ActiveDtc => "Active DTIC",
            Pgn::AdvDcsResponse => "AdvDCS Response",
            Pgn::ControllerFirst => "Controller 1st PGN",
            Pgn::ControllerSecond => "Controller 2nd PGN",
            Pgn::ControllerThird => "Controller 3rd PGN",
            Pgn::ModbusRegisters => "Modbus Registers",
        }
    }
}

/// Code-specific interpretation of the value words.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    J1939Status {
        status: u16,
    },
    ControllerFirst {
        generator_power_settings: u16,
        control_voltage: u8,
        max_charging_current: u8,
        start_delay: u8,
        stop_delay: u8,
        lvco: u16,
    },
    ControllerSecond {
        start_voltage: u16,
        stop_voltage: u16,
        unregulated_current: u8,
        regulated_current: u8,
        regulated_voltage: u16,
    },
    ControllerThird {
        battery_voltage: u16,
        charger_mode: u8,
        low_voltage_warning: bool,
        lvco: bool,
        charging_current: u8,
        gen_control: u8,
    },
    RegisterUpdate {
        register: u16,
        value: u16,
    },
    AdvDcsResponse {
        genset_status: u8,
        control_switch: u8,
    },
    /// Codes without a field layout, and unknown codes.
    Raw(Vec<u8>),
}

impl Payload {
    pub fn parse(pgn: Option<Pgn>, frame: &LogFrame) -> Self {
        let [v0, v1, v2, v3] = frame.values;
        let hi = |word: u16| (word >> 8) as u8;
        let lo = |word: u16| (word & 0x00FF) as u8;

        match pgn {
            Some(Pgn::J1939Status) => Payload::J1939Status { status: v0 },
            Some(Pgn::ControllerFirst) => Payload::ControllerFirst {
                generator_power_settings: v0,
                control_voltage: hi(v1),
                max_charging_current: lo(v1),
                start_delay: hi(v2),
                stop_delay: lo(v2),
                lvco: v3,
            },
            Some(Pgn::ControllerSecond) => Payload::ControllerSecond {
                start_voltage: v0,
                stop_voltage: v1,
                unregulated_current: hi(v2),
                regulated_current: lo(v2),
                regulated_voltage: v3,
            },
            Some(Pgn::ControllerThird) => Payload::ControllerThird {
                battery_voltage: v0,
                charger_mode: hi(v1),
                low_voltage_warning: v1 & 0x0001 != 0,
                lvco: v1 & 0x0002 != 0,
                charging_current: hi(v2),
                gen_control: lo(v2),
            },
            Some(Pgn::ModbusRegisters) => Payload::RegisterUpdate {
                register: v0,
                value: v1,
            },
            // First six bits of the AMMPS response: status in bits 0..3 of
            // the high byte, switch position in bits 4..5.
            Some(Pgn::AdvDcsResponse) => Payload::AdvDcsResponse {
                genset_status: hi(v0) & 0x0F,
                control_switch: (hi(v0) >> 4) & 0x03,
            },
            Some(Pgn::Null) | Some(Pgn::AddressClaimed) | Some(Pgn::ActiveDtc) | None => {
                Payload::Raw(frame.payload_bytes())
            }
        }
    }
}

/// Which part of the entry a decoded segment came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Field {
    Level,
    Code,
    Device,
    ByteCount,
    /// A named payload field.
    Payload(&'static str),
    /// The raw data dump.
    Data,
}

/// One `, `-separated piece of a decoded line.
#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    pub field: Field,
    pub text: String,
    pub anomalous: bool,
}

impl Segment {
    fn ok(field: Field, text: impl Into<String>) -> Self {
        Self {
            field,
            text: text.into(),
            anomalous: false,
        }
    }

    fn flagged(field: Field, text: impl Into<String>) -> Self {
        Self {
            field,
            text: text.into(),
            anomalous: true,
        }
    }
}

/// The result of decoding one entry.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedFrame {
    pub timestamp: Option<String>,
    pub pgn: Option<Pgn>,
    pub payload: Payload,
    pub segments: Vec<Segment>,
}

impl DecodedFrame {
    /// The decoded line without the timestamp.
    pub fn line(&self) -> String {
        self.segments
            .iter()
            .map(|segment| segment.text.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Fields that could not be interpreted.
    pub fn anomalies(&self) -> BTreeSet<Field> {
        self.segments
            .iter()
            .filter(|segment| segment.anomalous)
            .map(|segment| segment.field)
            .collect()
    }

    pub fn has_anomalies(&self) -> bool {
        self.segments.iter().any(|segment| segment.anomalous)
    }

    pub fn is_anomalous(&self, field: Field) -> bool {
        self.segments
            .iter()
            .any(|segment| segment.field == field && segment.anomalous)
    }
}

impl fmt::Display for DecodedFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(timestamp) = &self.timestamp {
            write!(f, "{}, ", timestamp)?;
        }
        f.write_str(&self.line())
    }
}

/// Stateless decoder bound to the register map used for register-update
/// entries.
#[derive(Debug, Clone)]
pub struct FrameDecoder {
    registers: Arc<RegisterMap>,
}

impl FrameDecoder {
    pub fn new(registers: Arc<RegisterMap>) -> Self {
        Self { registers }
    }

    /// Decodes `frame`, stamping it with the local time when asked.
    pub fn decode(&self, frame: &LogFrame, with_timestamp: bool) -> DecodedFrame {
        let timestamp = with_timestamp.then(|| format_timestamp(&Local::now()));
        self.render(frame, timestamp)
    }

    /// Decodes `frame` with a caller-supplied timestamp.
    pub fn decode_at(&self, frame: &LogFrame, at: &DateTime<Local>) -> DecodedFrame {
        self.render(frame, Some(format_timestamp(at)))
    }

    fn render(&self, frame: &LogFrame, timestamp: Option<String>) -> DecodedFrame {
        let mut segments = Vec::with_capacity(8);

        match LOG_LEVELS.get(frame.level as usize) {
            Some(level) => segments.push(Segment::ok(Field::Level, *level)),
            None => segments.push(Segment::flagged(Field::Level, frame.level.to_string())),
        }

        let pgn = Pgn::from_code(frame.code);
        match pgn {
            Some(pgn) => segments.push(Segment::ok(Field::Code, pgn.name())),
            None => segments.push(Segment::flagged(Field::Code, format!("{:#x}", frame.code))),
        }

        segments.push(device_segment(frame));

        if frame.byte_count <= MAX_PAYLOAD_BYTES {
            segments.push(Segment::ok(
                Field::ByteCount,
                format!("bytes:{}", frame.byte_count),
            ));
        } else {
            segments.push(Segment::flagged(
                Field::ByteCount,
                format!("bytes(illegal value, max 8):{}", frame.byte_count),
            ));
        }

        let payload = Payload::parse(pgn, frame);
        self.render_payload(&payload, &mut segments);

        let decoded = DecodedFrame {
            timestamp,
            pgn,
            payload,
            segments,
        };
        if decoded.has_anomalies() {
            debug!("log entry {:?} has anomalies {:?}", frame.to_words(), decoded.anomalies());
        }
        decoded
    }

    fn render_payload(&self, payload: &Payload, out: &mut Vec<Segment>) {
        match payload {
            Payload::J1939Status { status } => {
                out.push(enum_segment(Field::Payload("J1939_STATUS"), None, J1939_STATUSES, *status));
            }
            Payload::ControllerFirst {
                generator_power_settings,
                control_voltage,
                max_charging_current,
                start_delay,
                stop_delay,
                lvco,
            } => {
                out.push(scalar("GENERATOR_POWER_SETTINGS", *generator_power_settings));
                out.push(scalar("CONTROL_VOLTAGE", *control_voltage));
                out.push(scalar("MAX_CHARGING_CURRENT", *max_charging_current));
                out.push(scalar("START_DELAY", *start_delay));
                out.push(scalar("STOP_DELAY", *stop_delay));
                out.push(scalar("LVCO", *lvco));
            }
            Payload::ControllerSecond {
                start_voltage,
                stop_voltage,
                unregulated_current,
                regulated_current,
                regulated_voltage,
            } => {
                out.push(scalar("START_VOLTAGE", *start_voltage));
                out.push(scalar("STOP_VOLTAGE", *stop_voltage));
                out.push(scalar("UNREGULATED_CURRENT", *unregulated_current));
                out.push(scalar("REGULATED_CURRENT", *regulated_current));
                out.push(scalar("REGULATED_VOLTAGE", *regulated_voltage));
            }
            Payload::ControllerThird {
                battery_voltage,
                charger_mode,
                low_voltage_warning,
                lvco,
                charging_current,
                gen_control,
            } => {
                out.push(scalar("BATTERY_VOLTAGE", *battery_voltage));
                out.push(enum_segment(
                    Field::Payload("CHARGER_MODE"),
                    Some("CHARGER_MODE"),
                    CHARGER_MODES,
                    *charger_mode as u16,
                ));
                let flags: Vec<&str> = [
                    (*low_voltage_warning, "Low voltage warning"),
                    (*lvco, "LVCO"),
                ]
                .into_iter()
                .filter(|(set, _)| *set)
                .map(|(_, name)| name)
                .collect();
                out.push(Segment::ok(
                    Field::Payload("BIT"),
                    format!("BIT:{}", flags.join(";")),
                ));
                out.push(scalar("CHARGING_CURRENT", *charging_current));
                out.push(enum_segment(
                    Field::Payload("GEN_CONTROL"),
                    Some("GEN_CONTROL"),
                    GEN_CONTROLS,
                    *gen_control as u16,
                ));
            }
            Payload::RegisterUpdate { register, value } => {
                out.push(self.register_segment(*register, *value));
            }
            Payload::AdvDcsResponse {
                genset_status,
                control_switch,
            } => {
                out.push(enum_segment(
                    Field::Payload("GENSET_STATUS"),
                    Some("GENSET_STATUS"),
                    GENSET_STATUSES,
                    *genset_status as u16,
                ));
                out.push(enum_segment(
                    Field::Payload("CONTROL_SWITCH_POSITION"),
                    Some("CONTROL_SWITCH_POSITION"),
                    CONTROL_SWITCH_POSITIONS,
                    *control_switch as u16,
                ));
            }
            Payload::Raw(bytes) => {
                let dump: String = bytes.iter().map(|byte| format!(" {:#x}", byte)).collect();
                out.push(Segment::ok(Field::Data, format!("data:{}", dump)));
            }
        }
    }

    fn register_segment(&self, register: u16, value: u16) -> Segment {
        let field = Field::Payload("REGISTER");
        let Some(name) = self.registers.reverse(register) else {
            return Segment::flagged(field, format!("{:#x}:{}", register, value));
        };

        let table = match name.as_str() {
            "WARMUP_STATE" => Some(WARMUP_STATES),
            "AC_INPUT" => Some(AC_INPUTS),
            "GEN_CONTROL" => Some(GEN_CONTROLS),
            "CHARGER_MODE" => Some(CHARGER_MODES),
            _ => None,
        };
        if let Some(table) = table {
            return match lookup(table, value) {
                Some(text) => Segment::ok(field, format!("{}:{}", name, text)),
                None => Segment::flagged(field, format!("{}:{:#x}", name, value)),
            };
        }

        match name.as_str() {
            // 8.8 fixed point currents.
            "PID_INPUT" | "PID_OUTPUT" | "PID_SET_POINT" => {
                Segment::ok(field, format!("{}:{}", name, value as f64 / 256.0))
            }
            _ => Segment::ok(field, format!("{}:{}", name, value)),
        }
    }
}

fn device_segment(frame: &LogFrame) -> Segment {
    let index = frame.device_index();
    let mut segment = match DEVICES.get(index as usize) {
        Some(device) => Segment::ok(Field::Device, *device),
        None => Segment::flagged(Field::Device, format!("illegal device: {}", index)),
    };
    if frame.node() > 0 {
        segment.text.push_str(&format!(":{:02x}", frame.node()));
    }
    segment
}

fn scalar(name: &'static str, value: impl fmt::Display) -> Segment {
    Segment::ok(Field::Payload(name), format!("{}:{}", name, value))
}

fn enum_segment(
    field: Field,
    label: Option<&str>,
    table: &[(u16, &'static str)],
    raw: u16,
) -> Segment {
    let prefix = label.map(|label| format!("{}:", label)).unwrap_or_default();
    match lookup(table, raw) {
        Some(name) => Segment::ok(field, format!("{}{}", prefix, name)),
        None => Segment::flagged(field, format!("{}{:#x}", prefix, raw)),
    }
}

fn format_timestamp(at: &DateTime<Local>) -> String {
    at.format("%Y-%m-%dT%H:%M:%S%.6f").to_string()
}
