//! Register-command scripts.
//!
//! A script is plain text, one command per line:
//!
//! ```text
//! # register, value, write, delay, repeat[, description]
//! BUS_VOLTAGE, 1, false, 0, 1,
//! LOG_HEAD, 3, false, 0.5, 2, log head, tail and status
//! START_DELAY, 30, true, 0, 1, assert: x == 'OK'
//! ```
//!
//! Running a script never aborts: every row failure is written into the
//! report and the run moves on to the next row.

use crate::assertion::{Assertion, Value};
use crate::catalog::RegisterMap;
use crate::token::{coerce, Token};
use crate::transport::{Transport, TransportError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

pub const FAIL_MARKER: &str = "*** FAIL ***";
pub const ERROR_MARKER: &str = "*** ERROR ***";
pub const FAILED_SUMMARY: &str = "*** AT LEAST ONE COMMAND FAILED ***";
pub const PASSED_SUMMARY: &str = "No errors detected";

/// Minimum number of comma-separated fields in a script row.
pub const MIN_FIELDS: usize = 5;

const ASSERT_PREFIX: &str = "assert:";

#[derive(Debug, Clone, Error, PartialEq)]
pub enum ScriptError {
    #[error("not enough columns in \"{0}\"")]
    NotEnoughColumns(String),
    #[error("bad {field} '{value}' in \"{row}\"")]
    BadField {
        field: &'static str,
        value: String,
        row: String,
    },
}

/// What a command does on the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Write(u16),
    ReadMany(u16),
    ReadOne,
}

/// One executable script row.
#[derive(Debug, Clone, PartialEq)]
pub struct ScriptCommand {
    pub register: String,
    /// Count to read, or the value to write.
    pub value: i64,
    pub write: bool,
    /// Pause after each iteration.
    pub delay: Duration,
    pub repeat: u32,
    pub description: String,
    pub assertion: Option<String>,
}

impl ScriptCommand {
    /// A single read (or a read of `value` registers) with default settings.
    pub fn new(register: impl Into<String>, value: i64) -> Self {
        Self {
            register: register.into(),
            value,
            write: false,
            delay: Duration::ZERO,
            repeat: 1,
            description: String::new(),
            assertion: None,
        }
    }

    pub fn with_write(mut self, write: bool) -> Self {
        self.write = write;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_repeat(mut self, repeat: u32) -> Self {
        self.repeat = repeat.max(1);
        self
    }

    /// Sets the description; one starting with `assert:` (any case) also
    /// becomes the assertion.
    pub fn with_description(mut self, description: &str) -> Self {
        let description = description.trim();
        self.assertion = description
            .get(..ASSERT_PREFIX.len())
            .filter(|prefix| prefix.eq_ignore_ascii_case(ASSERT_PREFIX))
            .map(|_| description[ASSERT_PREFIX.len()..].trim().to_string());
        self.description = description.to_string();
        self
    }

    /// Parses `register, value, write, delay, repeat[, description]`.
    ///
    /// Everything after the fifth comma is the description, commas included.
    pub fn parse_row(row: &str) -> Result<Self, ScriptError> {
        let row = row.trim();
        let fields: Vec<&str> = row.split(',').map(str::trim).collect();
        if fields.len() < MIN_FIELDS {
            return Err(ScriptError::NotEnoughColumns(row.to_string()));
        }

        let bad = |field: &'static str, value: &str| ScriptError::BadField {
            field,
            value: value.to_string(),
            row: row.to_string(),
        };

        let value = match coerce(fields[1]) {
            Token::Integer(n) => n,
            Token::Float(x) if x.fract() == 0.0 && x.abs() <= i64::MAX as f64 => x as i64,
            _ => return Err(bad("value", fields[1])),
        };
        let write = match coerce(fields[2]) {
            Token::Bool(b) => b,
            Token::Integer(0) => false,
            Token::Integer(1) => true,
            _ => return Err(bad("write flag", fields[2])),
        };
        let delay = coerce(fields[3])
            .as_f64()
            .and_then(|seconds| Duration::try_from_secs_f64(seconds).ok())
            .ok_or_else(|| bad("delay", fields[3]))?;
        let repeat = match coerce(fields[4]) {
            Token::Integer(n) if n >= 1 && n <= u32::MAX as i64 => n as u32,
            _ => return Err(bad("repeat count", fields[4])),
        };
        let description = fields.get(MIN_FIELDS..).map(|rest| rest.join(",")).unwrap_or_default();

        Ok(Self::new(fields[0], value)
            .with_write(write)
            .with_delay(delay)
            .with_repeat(repeat)
            .with_description(&description))
    }

    /// Classifies the command; fails when `value` does not fit a register
    /// or a register count.
    pub fn operation(&self) -> Result<Operation, String> {
        let word = u16::try_from(self.value);
        match (self.write, word) {
            (true, Ok(word)) => Ok(Operation::Write(word)),
            (true, Err(_)) => Err(format!("value {} does not fit a register", self.value)),
            (false, Ok(count)) if count > 1 => Ok(Operation::ReadMany(count)),
            (false, Err(_)) if self.value > 1 => {
                Err(format!("cannot read {} registers", self.value))
            }
            (false, _) => Ok(Operation::ReadOne),
        }
    }
}

/// What one command produced.
#[derive(Debug, Clone, PartialEq)]
pub struct Execution {
    /// Report text for the row, newline-terminated.
    pub text: String,
    /// One result per completed iteration; `Null` where the bus failed.
    pub results: Vec<Value>,
    pub cancelled: bool,
}

/// The accumulated output of one script run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    pub text: String,
    /// Executable (non-comment, non-blank) rows seen.
    pub commands: usize,
    pub had_failures: bool,
    pub cancelled: bool,
}

impl RunReport {
    pub fn summary(&self) -> &'static str {
        if self.had_failures {
            FAILED_SUMMARY
        } else {
            PASSED_SUMMARY
        }
    }
}

/// Runs commands against one register map.
///
/// The map is captured at construction, so a product switch elsewhere never
/// affects a run in progress.
#[derive(Debug, Clone)]
pub struct Interpreter {
    registers: Arc<RegisterMap>,
    cancel: Option<Arc<AtomicBool>>,
}

impl Interpreter {
    pub fn new(registers: Arc<RegisterMap>) -> Self {
        Self {
            registers,
            cancel: None,
        }
    }

    /// Checks `flag` at every row and iteration boundary.
    pub fn with_cancel(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }

    pub fn registers(&self) -> &Arc<RegisterMap> {
        &self.registers
    }

    fn cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::Relaxed))
    }

    /// Executes one command and returns its report text.
    pub fn execute<T>(&self, command: &ScriptCommand, transport: &mut T) -> Execution
    where
        T: Transport + ?Sized,
    {
        let mut execution = Execution {
            text: String::new(),
            results: Vec::new(),
            cancelled: false,
        };

        let address = match self.registers.resolve(&command.register) {
            Ok(address) => address,
            Err(err) => {
                warn!("{}", err);
                execution.text = format!("{} {}\n", ERROR_MARKER, err);
                return execution;
            }
        };

        let operation = match command.operation() {
            Ok(operation) => operation,
            Err(reason) => {
                execution.text = format!("{} {} for {}\n", ERROR_MARKER, reason, command.register);
                return execution;
            }
        };

        let target = format!("{}({})", command.register, address);
        let text = &mut execution.text;
        match operation {
            Operation::Write(word) => text.push_str(&format!("Write {} to {}", word, target)),
            Operation::ReadMany(count) => {
                text.push_str(&format!("Read {} registers starting at {}", count, target))
            }
            Operation::ReadOne => text.push_str(&format!("Read from {}", target)),
        }
        if command.description.is_empty() {
            text.push_str(": ");
        } else {
            text.push_str(&format!(" [{}]: ", command.description));
        }

        let assertion = command.assertion.as_deref().map(Assertion::parse);

        for i in 0..command.repeat {
            if self.cancelled() {
                text.push_str(&format!("{} run cancelled", ERROR_MARKER));
                execution.cancelled = true;
                break;
            }
            if command.repeat > 1 {
                text.push_str(&format!("{}:", i + 1));
            }

            debug!("{:?} at {} ({}/{})", operation, target, i + 1, command.repeat);
            let value = match perform(operation, address, transport) {
                Ok(value) => value,
                Err(err @ TransportError::IllegalAddress(_)) => {
                    warn!("{} on {}", err, target);
                    text.push_str(&format!("{} {}", ERROR_MARKER, err));
                    break;
                }
                Err(err) => {
                    warn!("{} on {}. Continuing...", err, target);
                    Value::Null
                }
            };
            text.push_str(&value.to_string());

            match &assertion {
                None => {}
                Some(Ok(assertion)) => match assertion.evaluate(&value) {
                    Ok(true) => text.push_str(": PASS"),
                    Ok(false) => text.push_str(&format!(": {}", FAIL_MARKER)),
                    Err(err) => text.push_str(&format!(": {} {}", ERROR_MARKER, err)),
                },
                Some(Err(err)) => text.push_str(&format!(": {} {}", ERROR_MARKER, err)),
            }
            execution.results.push(value);

            if i + 1 < command.repeat {
                text.push_str("; ");
            }
            if !command.delay.is_zero() {
                thread::sleep(command.delay);
            }
        }

        text.push('\n');
        execution
    }

    /// Runs a whole script and appends the trailer.
    pub fn run<T>(&self, script: &str, transport: &mut T) -> RunReport
    where
        T: Transport + ?Sized,
    {
        let rows: Vec<&str> = script
            .lines()
            .filter(|line| {
                let line = line.trim_start();
                !line.is_empty() && !line.starts_with('#')
            })
            .collect();

        let mut text = String::new();
        let mut cancelled = false;
        for row in &rows {
            if self.cancelled() {
                text.push_str(&format!("{} run cancelled\n", ERROR_MARKER));
                cancelled = true;
                break;
            }
            match ScriptCommand::parse_row(row) {
                Ok(command) => {
                    let execution = self.execute(&command, transport);
                    text.push_str(&execution.text);
                    if execution.cancelled {
                        cancelled = true;
                        break;
                    }
                }
                Err(err) => {
                    warn!("{}", err);
                    text.push_str(&format!("{} {}\n", ERROR_MARKER, err));
                }
            }
        }

        let had_failures = text.contains(FAIL_MARKER) || text.contains(ERROR_MARKER);
        let mut report = RunReport {
            text,
            commands: rows.len(),
            had_failures,
            cancelled,
        };
        let summary = report.summary();
        info!("script finished: {} commands, {}", report.commands, summary);
        report
            .text
            .push_str(&format!("{} commands processed.\n{}", report.commands, summary));
        report
    }
}

fn perform<T>(operation: Operation, address: u16, transport: &mut T) -> Result<Value, TransportError>
where
    T: Transport + ?Sized,
{
    match operation {
        Operation::Write(word) => transport
            .write_one(address, word)
            .map(|()| Value::Text("OK".to_string())),
        Operation::ReadMany(count) => transport
            .read_many(address, count)
            .map(|words| Value::List(words.into_iter().map(i64::from).collect())),
        Operation::ReadOne => transport
            .read_one(address)
            .map(|word| Value::Int(word as i64)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{Call, MemoryTransport};

    fn registers() -> Arc<RegisterMap> {
        Arc::new(
            RegisterMap::new([
                ("LOG_HEAD", 2),
                ("LOG_TAIL", 3),
                ("LOG_STATUS", 4),
                ("START_DELAY", 38),
                ("BUS_VOLTAGE", 45),
            ])
            .unwrap(),
        )
    }

    fn device() -> MemoryTransport {
        let mut device = MemoryTransport::for_map(&registers());
        device.set(2, 10).set(3, 4).set(4, 1).set(45, 2712);
        device
    }

    #[test]
    fn parse_full_row() {
        let command = ScriptCommand::parse_row("LOG_HEAD, 3, false, 0.5, 2, head, tail and status")
            .unwrap();
        assert_eq!(command.register, "LOG_HEAD");
        assert_eq!(command.value, 3);
        assert!(!command.write);
        assert_eq!(command.delay, Duration::from_millis(500));
        assert_eq!(command.repeat, 2);
        assert_eq!(command.description, "head,tail and status");
        assert_eq!(command.assertion, None);
    }

    #[test]
    fn parse_assertion_prefix() {
        let command = ScriptCommand::parse_row("BUS_VOLTAGE,1,FALSE,0,1,ASSERT: x > 2400").unwrap();
        assert_eq!(command.assertion.as_deref(), Some("x > 2400"));
        assert_eq!(command.description, "ASSERT: x > 2400");
    }

    #[test]
    fn parse_rejects_short_and_bad_rows() {
        assert_eq!(
            ScriptCommand::parse_row("BUS_VOLTAGE,1,false,0"),
            Err(ScriptError::NotEnoughColumns("BUS_VOLTAGE,1,false,0".into()))
        );
        assert!(matches!(
            ScriptCommand::parse_row("BUS_VOLTAGE,one,false,0,1"),
            Err(ScriptError::BadField { field: "value", .. })
        ));
        assert!(matches!(
            ScriptCommand::parse_row("BUS_VOLTAGE,1,maybe,0,1"),
            Err(ScriptError::BadField { field: "write flag", .. })
        ));
        assert!(matches!(
            ScriptCommand::parse_row("BUS_VOLTAGE,1,false,-1,1"),
            Err(ScriptError::BadField { field: "delay", .. })
        ));
        assert!(matches!(
            ScriptCommand::parse_row("BUS_VOLTAGE,1,false,0,0"),
            Err(ScriptError::BadField { field: "repeat count", .. })
        ));
    }

    #[test]
    fn oversized_delay_is_a_bad_row() {
        assert!(matches!(
            ScriptCommand::parse_row("BUS_VOLTAGE,1,false,1e20,1"),
            Err(ScriptError::BadField { field: "delay", .. })
        ));
        assert!(matches!(
            ScriptCommand::parse_row("BUS_VOLTAGE,1,false,inf,1"),
            Err(ScriptError::BadField { field: "delay", .. })
        ));

        let interpreter = Interpreter::new(registers());
        let mut device = device();
        let report = interpreter.run(
            "BUS_VOLTAGE,1,false,1e20,1\nBUS_VOLTAGE,1,false,0,1\n",
            &mut device,
        );
        assert_eq!(
            report.text,
            "*** ERROR *** bad delay '1e20' in \"BUS_VOLTAGE,1,false,1e20,1\"\n\
             Read from BUS_VOLTAGE(45): 2712\n\
             2 commands processed.\n\
             *** AT LEAST ONE COMMAND FAILED ***"
        );
        assert_eq!(device.calls(), &[Call::ReadOne(45)]);
    }

    #[test]
    fn fractional_write_value_is_reported() {
        assert!(matches!(
            ScriptCommand::parse_row("START_DELAY,30.5,true,0,1"),
            Err(ScriptError::BadField { field: "value", .. })
        ));

        let interpreter = Interpreter::new(registers());
        let mut device = device();
        let report = interpreter.run("START_DELAY,30.5,true,0,1\n", &mut device);
        assert!(report
            .text
            .starts_with("*** ERROR *** bad value '30.5' in \"START_DELAY,30.5,true,0,1\"\n"));
        assert!(report.had_failures);
        assert!(device.calls().is_empty());
        assert_eq!(device.get(38), Some(0));
    }

    #[test]
    fn numeric_write_flag_and_float_value() {
        let command = ScriptCommand::parse_row("START_DELAY,30.0,1,0,1").unwrap();
        assert!(command.write);
        assert_eq!(command.value, 30);
        assert_eq!(command.operation(), Ok(Operation::Write(30)));
    }

    #[test]
    fn operation_classification() {
        assert_eq!(ScriptCommand::new("A", 1).operation(), Ok(Operation::ReadOne));
        assert_eq!(ScriptCommand::new("A", 0).operation(), Ok(Operation::ReadOne));
        assert_eq!(ScriptCommand::new("A", 3).operation(), Ok(Operation::ReadMany(3)));
        assert!(ScriptCommand::new("A", -1).with_write(true).operation().is_err());
        assert!(ScriptCommand::new("A", 70000).operation().is_err());
    }

    #[test]
    fn single_read() {
        let interpreter = Interpreter::new(registers());
        let mut device = device();
        let execution = interpreter.execute(&ScriptCommand::new("BUS_VOLTAGE", 1), &mut device);
        assert_eq!(execution.text, "Read from BUS_VOLTAGE(45): 2712\n");
        assert_eq!(execution.results, vec![Value::Int(2712)]);
        assert_eq!(device.calls(), &[Call::ReadOne(45)]);
    }

    #[test]
    fn multi_read_is_one_call() {
        let interpreter = Interpreter::new(registers());
        let mut device = device();
        let execution = interpreter.execute(&ScriptCommand::new("LOG_HEAD", 3), &mut device);
        assert_eq!(
            execution.text,
            "Read 3 registers starting at LOG_HEAD(2): [10, 4, 1]\n"
        );
        assert_eq!(device.calls(), &[Call::ReadMany(2, 3)]);
    }

    #[test]
    fn write_then_read_back() {
        let interpreter = Interpreter::new(registers());
        let mut device = device();
        let write = ScriptCommand::new("START_DELAY", 30)
            .with_write(true)
            .with_description("assert: x == 'OK'");
        let execution = interpreter.execute(&write, &mut device);
        assert_eq!(
            execution.text,
            "Write 30 to START_DELAY(38) [assert: x == 'OK']: OK: PASS\n"
        );
        assert_eq!(device.get(38), Some(30));
    }

    #[test]
    fn repeats_are_numbered_and_separated() {
        let interpreter = Interpreter::new(registers());
        let mut device = device();
        let command = ScriptCommand::new("BUS_VOLTAGE", 1)
            .with_repeat(3)
            .with_description("assert: x > 0");
        let execution = interpreter.execute(&command, &mut device);
        assert_eq!(
            execution.text,
            "Read from BUS_VOLTAGE(45) [assert: x > 0]: 1:2712: PASS; 2:2712: PASS; 3:2712: PASS\n"
        );
        assert_eq!(device.calls().len(), 3);
    }

    #[test]
    fn unknown_register_makes_no_call() {
        let interpreter = Interpreter::new(registers());
        let mut device = device();
        let execution = interpreter.execute(&ScriptCommand::new("NOPE", 1), &mut device);
        assert_eq!(execution.text, "*** ERROR *** unknown key NOPE\n");
        assert!(device.calls().is_empty());
    }

    #[test]
    fn assertion_outcomes() {
        let interpreter = Interpreter::new(registers());
        let mut device = device();
        device.set(3, 0);

        let pass = ScriptCommand::new("BUS_VOLTAGE", 1).with_description("assert: x > 0");
        assert!(interpreter.execute(&pass, &mut device).text.ends_with(": PASS\n"));

        let fail = ScriptCommand::new("LOG_TAIL", 1).with_description("assert: x > 0");
        assert!(interpreter
            .execute(&fail, &mut device)
            .text
            .ends_with(": *** FAIL ***\n"));

        let bad = ScriptCommand::new("BUS_VOLTAGE", 1).with_description("assert: y > 0");
        assert!(interpreter
            .execute(&bad, &mut device)
            .text
            .ends_with(": *** ERROR *** name 'y' is not defined\n"));
    }

    #[test]
    fn no_response_continues_with_null() {
        let interpreter = Interpreter::new(registers());
        let mut device = device();
        device.fail_next(TransportError::NoResponse);
        let command = ScriptCommand::new("BUS_VOLTAGE", 1)
            .with_repeat(2)
            .with_description("assert: x > 0");
        let execution = interpreter.execute(&command, &mut device);
        assert_eq!(
            execution.text,
            "Read from BUS_VOLTAGE(45) [assert: x > 0]: \
             1:(null): *** ERROR *** no result to evaluate; 2:2712: PASS\n"
        );
        assert_eq!(execution.results, vec![Value::Null, Value::Int(2712)]);
    }

    #[test]
    fn illegal_address_aborts_the_row() {
        let interpreter = Interpreter::new(registers());
        let mut device = device();
        device.fail_next(TransportError::IllegalAddress(45));
        let execution = interpreter.execute(&ScriptCommand::new("BUS_VOLTAGE", 1).with_repeat(3), &mut device);
        assert_eq!(
            execution.text,
            "Read from BUS_VOLTAGE(45): 1:*** ERROR *** illegal address 45\n"
        );
        assert_eq!(device.calls().len(), 1);
        assert!(execution.results.is_empty());
    }

    #[test]
    fn run_skips_comments_and_reports_bad_rows() {
        let interpreter = Interpreter::new(registers());
        let mut device = device();
        let script = "# header\n\nBUS_VOLTAGE,1,false,0,1,\nLOG_HEAD,3\nNOPE,1,false,0,1\n";
        let report = interpreter.run(script, &mut device);
        assert_eq!(
            report.text,
            "Read from BUS_VOLTAGE(45): 2712\n\
             *** ERROR *** not enough columns in \"LOG_HEAD,3\"\n\
             *** ERROR *** unknown key NOPE\n\
             3 commands processed.\n\
             *** AT LEAST ONE COMMAND FAILED ***"
        );
        assert_eq!(report.commands, 3);
        assert!(report.had_failures);
    }

    #[test]
    fn clean_run_summary() {
        let interpreter = Interpreter::new(registers());
        let mut device = device();
        let report = interpreter.run("BUS_VOLTAGE,1,false,0,1,\n", &mut device);
        assert_eq!(
            report.text,
            "Read from BUS_VOLTAGE(45): 2712\n1 commands processed.\nNo errors detected"
        );
        assert!(!report.had_failures);
        assert!(!report.cancelled);
    }

    #[test]
    fn cancellation_stops_at_a_boundary() {
        let flag = Arc::new(AtomicBool::new(true));
        let interpreter = Interpreter::new(registers()).with_cancel(flag);
        let mut device = device();
        let report = interpreter.run("BUS_VOLTAGE,1,false,0,1\nLOG_TAIL,1,false,0,1\n", &mut device);
        assert!(report.cancelled);
        assert!(report.had_failures);
        assert!(device.calls().is_empty());
        assert!(report.text.starts_with("*** ERROR *** run cancelled\n2 commands processed.\n"));
    }
}
