use mbtik::transport::Call;
use mbtik::{
    ClientConfig, LogFrame, MemoryTransport, ProductSet, ScriptCommand, Session, TransportError,
};
use std::io::Write;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

const PRO_VERTER: &str = "24VDC PRO-Verter 5000-220 AFF1 (20-0104033)";

fn hypr_session() -> (Session, MemoryTransport) {
    let session = Session::new(ProductSet::builtin()).unwrap();
    let device = MemoryTransport::for_map(&session.product().registers);
    (session, device)
}

#[test]
fn bus_voltage_script_end_to_end() {
    let (session, mut device) = hypr_session();
    device.set(45, 2712);

    let report = session.interpret_script("BUS_VOLTAGE,1,false,0,1,\n", &mut device);

    assert_eq!(device.calls(), &[Call::ReadOne(45)]);
    assert!(report.text.contains("Read from BUS_VOLTAGE(45): 2712"));
    assert!(report.text.contains("1 commands processed."));
    assert!(report.text.ends_with("No errors detected"));
    assert!(!report.had_failures);
}

#[test]
fn regression_script_with_assertions() {
    let (session, mut device) = hypr_session();
    let start_delay = session.resolve_register("START_DELAY").unwrap();
    device.set(45, 2712).set(2, 10).set(3, 10).set(4, 0);

    let script = "\
# power-on checks
BUS_VOLTAGE, 1, false, 0, 2, assert: x > 2400

LOG_HEAD, 3, false, 0, 1, assert: x[0] == x[1]
START_DELAY, 45, true, 0, 1, assert: x == 'OK'
START_DELAY, 1, false, 0, 1, assert: x == 45
NOT_A_REGISTER, 1, false, 0, 1
BUS_VOLTAGE, 1, false, 0, 1, assert: x < 1000
";
    let report = session.interpret_script(script, &mut device);
    let lines: Vec<&str> = report.text.lines().collect();

    assert_eq!(
        lines[0],
        "Read from BUS_VOLTAGE(45) [assert: x > 2400]: 1:2712: PASS; 2:2712: PASS"
    );
    assert_eq!(
        lines[1],
        "Read 3 registers starting at LOG_HEAD(2) [assert: x[0] == x[1]]: [10, 10, 0]: PASS"
    );
    assert!(lines[2].ends_with("OK: PASS"));
    assert!(lines[3].ends_with("45: PASS"));
    assert_eq!(lines[4], "*** ERROR *** unknown key NOT_A_REGISTER");
    assert!(lines[5].ends_with("2712: *** FAIL ***"));
    assert_eq!(lines[6], "6 commands processed.");
    assert_eq!(lines[7], "*** AT LEAST ONE COMMAND FAILED ***");

    assert_eq!(device.get(start_delay), Some(45));
    assert!(report.had_failures);
}

#[test]
fn flaky_bus_does_not_stop_the_run() {
    let (session, mut device) = hypr_session();
    device.set(45, 2712);
    device
        .fail_next(TransportError::NoResponse)
        .fail_next(TransportError::MalformedResponse("bad crc".into()));

    let report = session.interpret_script(
        "BUS_VOLTAGE,1,false,0,1\nBUS_VOLTAGE,1,false,0,1\nBUS_VOLTAGE,1,false,0,1\n",
        &mut device,
    );
    let lines: Vec<&str> = report.text.lines().collect();
    assert_eq!(lines[0], "Read from BUS_VOLTAGE(45): (null)");
    assert_eq!(lines[1], "Read from BUS_VOLTAGE(45): (null)");
    assert_eq!(lines[2], "Read from BUS_VOLTAGE(45): 2712");
    assert_eq!(device.calls().len(), 3);
}

#[test]
fn cancelled_run_still_has_a_trailer() {
    let (session, mut device) = hypr_session();
    let cancel = Arc::new(AtomicBool::new(true));
    let report = session
        .interpreter()
        .with_cancel(cancel)
        .run("BUS_VOLTAGE,1,false,0,1\n", &mut device);
    assert!(report.cancelled);
    assert!(report.text.contains("run cancelled"));
    assert!(report.text.ends_with("*** AT LEAST ONE COMMAND FAILED ***"));
}

#[test]
fn j1939_status_frame() {
    let (session, _) = hypr_session();
    let decoded = session.decode_frame(&LogFrame::from([2, 2, 0x0001, 4, 2, 0, 0, 0]), false);
    assert_eq!(
        decoded.to_string(),
        "CRIT, J1939_STATUS, CAN_B, bytes:4, NORMALDATATRAFFIC"
    );
    assert!(!decoded.has_anomalies());
}

#[test]
fn polled_entries_decode_against_the_active_map() {
    let (session, mut device) = hypr_session();
    device.queue_log([7, 0xFF23, 0x0102, 4, 45, 2650, 0, 0]);

    let frame = session.poll_log(&mut device).unwrap().unwrap();
    let decoded = session.decode_frame(&frame, false);
    assert_eq!(
        decoded.line(),
        "DEBUG, Modbus Registers, RS485:01, bytes:4, BUS_VOLTAGE:2650"
    );
    assert_eq!(session.poll_log(&mut device).unwrap(), None);
}

#[test]
fn product_switch_changes_names_and_addresses() {
    let mut session = Session::new(ProductSet::builtin()).unwrap();
    let old = session.interpreter();

    session.switch_product(PRO_VERTER).unwrap();
    let mut device = MemoryTransport::for_map(&session.product().registers);

    let report = session.interpret_script("BUS_VOLTAGE,1,false,0,1\n", &mut device);
    assert!(report.text.contains("unknown key BUS_VOLTAGE"));
    assert!(device.calls().is_empty());

    // an interpreter taken before the switch still knows the old map
    assert_eq!(old.registers().resolve("BUS_VOLTAGE"), Ok(45));

    let line = session.execute_command(
        &ScriptCommand::new("Control", 1).with_write(true),
        &mut device,
    );
    assert_eq!(line, "Write 1 to Control(512): OK\n");
}

#[test]
fn configured_product_from_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(
        file,
        r#"
product = "Bench"

[[products]]
name = "Bench"
baud_rate = 19200
registers = [
    {{ name = "LOG_LEVEL", address = 100 }},
    {{ name = "TEMP", address = 101 }},
]
"#
    )
    .unwrap();

    let session = ClientConfig::load(file.path()).unwrap().session().unwrap();
    let mut device = MemoryTransport::for_map(&session.product().registers);
    device.set(101, 21).queue_log([6, 0xFF23, 0, 4, 101, 21, 0, 0]);

    let report = session.interpret_script("TEMP,1,false,0,1,assert: x == 21", &mut device);
    assert!(report.text.starts_with("Read from TEMP(101) [assert: x == 21]: 21: PASS\n"));

    let frame = session.poll_log(&mut device).unwrap().unwrap();
    assert!(session.decode_frame(&frame, false).line().ends_with("TEMP:21"));
    assert_eq!(device.calls().last(), Some(&Call::ReadMany(100, 8)));
}
