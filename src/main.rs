mod monitor;

use clap::Parser;
use crossterm::event::{self, Event, KeyCode, KeyEventKind};
use crossterm::terminal::{disable_raw_mode, enable_raw_mode, is_raw_mode_enabled};
use mbtik::{
    ClientConfig, MemoryTransport, ModbusTransport, Product, ScriptCommand, Session, Transport,
    VERSION,
};
use serialport::SerialPortType;
use std::fs;
use std::io::{self, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

// USB-serial adapters the controllers ship with.
const PREFERRED_ADAPTERS: [&str; 2] = ["CP210", "USB Serial Port"];

#[derive(Parser, Debug)]
#[command(name = "mbtik_cli", version, about = "Modbus remote client for power controllers")]
struct Cli {
    /// TOML settings file.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Active product name.
    #[arg(long)]
    product: Option<String>,
    /// Serial port; discovered when omitted.
    #[arg(long)]
    port: Option<String>,
    /// Overrides the product's baud rate.
    #[arg(long)]
    baud: Option<u32>,
    /// Append decoded log lines to this file.
    #[arg(long)]
    log_file: Option<PathBuf>,
    /// Prefix decoded log lines with the local time.
    #[arg(long)]
    timestamp: bool,
    /// Print the known products and exit.
    #[arg(long)]
    list_products: bool,
    /// Talk to an in-memory device instead of a serial port.
    #[arg(long)]
    simulate: bool,
}

// The main entry point for the command-line client.
fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(|| TerminalStderr)
        .init();

    let cli = Cli::parse();
    let mut config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("[ERROR] {}", e);
            return ExitCode::FAILURE;
        }
    };
    let mut session = match config.session() {
        Ok(session) => session,
        Err(e) => {
            eprintln!("[ERROR] {}", e);
            return ExitCode::FAILURE;
        }
    };

    if cli.list_products {
        for product in session.products().iter() {
            println!(
                "{}  ({} baud, unit {}, {} registers)",
                product.name,
                product.baud_rate,
                product.unit_id,
                product.registers.len()
            );
        }
        return ExitCode::SUCCESS;
    }

    println!("===============================");
    println!("  Modbus Remote Client {}", VERSION);
    println!("===============================");

    if !cli.simulate && config.port.is_none() {
        match discover_port() {
            Ok(port) => config = config.with_port(port),
            Err(e) => {
                eprintln!("[ERROR] {}", e);
                return ExitCode::FAILURE;
            }
        }
    }

    let mut transport = match open_transport(&config, &session.product(), cli.simulate) {
        Ok(transport) => Some(transport),
        Err(e) => {
            eprintln!("[ERROR] {}", e);
            return ExitCode::FAILURE;
        }
    };
    println!("Product: {}", session.product().name);

    // Main menu loop.
    loop {
        println!("\nSelect mode:");
        println!("  1. Run Script File");
        println!("  2. Single Command");
        println!("  3. Log Monitor");
        println!("  4. Switch Product");
        println!("  5. Exit");

        let choice = match prompt("> ") {
            Ok(choice) => choice,
            Err(_) => break,
        };

        match choice.as_str() {
            "1" | "2" | "3" => {
                let Some(transport) = transport.as_deref_mut() else {
                    eprintln!("[ERROR] Not connected. Switch product to reconnect.");
                    continue;
                };
                match choice.as_str() {
                    "1" => run_script_mode(&session, transport),
                    "2" => run_command_mode(&session, transport),
                    _ => {
                        if let Err(e) = monitor::run(&session, transport, &config) {
                            eprintln!("[ERROR] Log monitor failed: {}", e);
                        }
                    }
                }
            }
            "4" => {
                if let Some(name) = choose_product(&session) {
                    let result = session.switch_and_reconnect(&name, &mut transport, |product| {
                        open_transport(&config, product, cli.simulate)
                    });
                    match result {
                        Ok(product) => println!("Product: {}", product.name),
                        Err(e) => {
                            eprintln!("[ERROR] {}", e);
                            println!("Product: {}", session.product().name);
                        }
                    }
                }
            }
            "5" => break,
            _ => eprintln!("[ERROR] Invalid choice. Please enter 1 to 5."),
        }
    }

    ExitCode::SUCCESS
}

fn load_config(cli: &Cli) -> Result<ClientConfig, mbtik::ConfigError> {
    let mut config = match &cli.config {
        Some(path) => ClientConfig::load(path)?,
        None => ClientConfig::default(),
    };
    if let Some(product) = &cli.product {
        config = config.with_product(product.clone());
    }
    if let Some(port) = &cli.port {
        config = config.with_port(port.clone());
    }
    if let Some(baud) = cli.baud {
        config = config.with_baud_rate(baud);
    }
    if let Some(path) = &cli.log_file {
        config = config.with_log_file(path.clone());
    }
    if cli.timestamp {
        config = config.with_timestamp(true);
    }
    Ok(config)
}

/// Prints `label` and reads one trimmed line. EOF is an error.
fn prompt(label: &str) -> io::Result<String> {
    print!("{}", label);
    io::stdout().flush()?;
    let mut line = String::new();
    if io::stdin().read_line(&mut line)? == 0 {
        return Err(io::Error::from(io::ErrorKind::UnexpectedEof));
    }
    Ok(line.trim().to_string())
}

fn open_transport(
    config: &ClientConfig,
    product: &Product,
    simulate: bool,
) -> Result<Box<dyn Transport>, String> {
    if simulate {
        println!("Using a simulated device.");
        return Ok(Box::new(simulated_device(product)));
    }

    let port_name = config
        .port
        .as_deref()
        .ok_or_else(|| "No serial port selected.".to_string())?;
    let baud_rate = config.baud_rate.unwrap_or(product.baud_rate);
    let transport = ModbusTransport::open_with(port_name, baud_rate, product)
        .map_err(|e| format!("Failed to open port '{}': {}", port_name, e))?;
    info!("Connected on {} at {} baud", port_name, baud_rate);
    Ok(Box::new(transport))
}

// Every register reads zero, with a few log entries queued.
fn simulated_device(product: &Product) -> MemoryTransport {
    let mut device = MemoryTransport::for_map(&product.registers);
    device
        .queue_log([2, 2, 0x0001, 4, 2, 0, 0, 0])
        .queue_log([6, 0x1234, 0x0203, 11, 0x0102, 0x0304, 0x0506, 0x0708]);
    device
}

fn discover_port() -> Result<String, String> {
    let ports = serialport::available_ports()
        .map_err(|e| format!("Could not enumerate serial ports: {}", e))?;
    if ports.is_empty() {
        return Err("No serial ports found.".to_string());
    }

    let preferred = ports.iter().find(|port| match &port.port_type {
        SerialPortType::UsbPort(usb) => usb.product.as_deref().is_some_and(|name| {
            PREFERRED_ADAPTERS
                .iter()
                .any(|adapter| name.contains(adapter))
        }),
        _ => false,
    });
    if let Some(port) = preferred {
        println!("Found adapter on {}", port.port_name);
        return Ok(port.port_name.clone());
    }

    println!("Available serial ports:");
    for (i, port) in ports.iter().enumerate() {
        println!("  {}: {}", i, port.port_name);
    }
    let choice = prompt("Select a port (number): ").map_err(|e| e.to_string())?;
    match choice.parse::<usize>() {
        Ok(i) if i < ports.len() => Ok(ports[i].port_name.clone()),
        _ => Err("Invalid port selection.".to_string()),
    }
}

// Runs a script file; Esc cancels between iterations.
fn run_script_mode(session: &Session, transport: &mut dyn Transport) {
    println!("\n--- Script Mode ---");
    let path = match prompt("Script file: ") {
        Ok(path) if !path.is_empty() => path,
        _ => return,
    };
    let text = match fs::read_to_string(&path) {
        Ok(text) => text,
        Err(e) => {
            eprintln!("[ERROR] Could not read '{}': {}", path, e);
            return;
        }
    };

    let cancel = Arc::new(AtomicBool::new(false));
    let done = Arc::new(AtomicBool::new(false));
    let interpreter = session.interpreter().with_cancel(Arc::clone(&cancel));

    println!("Running {} (Esc cancels)...", path);
    let watcher = if enable_raw_mode().is_ok() {
        Some(watch_for_escape(Arc::clone(&cancel), Arc::clone(&done)))
    } else {
        warn!("Terminal does not support raw mode; the run cannot be cancelled");
        None
    };

    let report = interpreter.run(&text, transport);

    done.store(true, Ordering::Relaxed);
    if let Some(watcher) = watcher {
        let joined = watcher.join();
        if let Err(e) = disable_raw_mode() {
            warn!("Could not leave raw mode: {}", e);
        }
        if joined.is_err() {
            warn!("Cancel watcher panicked");
        }
    }
    println!("{}", report.text);
}

fn watch_for_escape(cancel: Arc<AtomicBool>, done: Arc<AtomicBool>) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        while !done.load(Ordering::Relaxed) {
            match event::poll(Duration::from_millis(100)) {
                Ok(true) => {
                    if let Ok(Event::Key(key)) = event::read() {
                        if key.kind == KeyEventKind::Press && key.code == KeyCode::Esc {
                            cancel.store(true, Ordering::Relaxed);
                        }
                    }
                }
                Ok(false) => {}
                Err(_) => break,
            }
        }
    })
}

// Handles single command input, one row at a time.
fn run_command_mode(session: &Session, transport: &mut dyn Transport) {
    println!("\n--- Command Mode ---");
    println!("Enter register,value,write,delay,repeat[,description], or 'back' to return.");

    loop {
        let line = match prompt("> ") {
            Ok(line) => line,
            Err(_) => break,
        };
        if line == "back" {
            break;
        }
        if line.is_empty() {
            continue;
        }
        match ScriptCommand::parse_row(&line) {
            Ok(command) => print!("< {}", session.execute_command(&command, transport)),
            Err(e) => eprintln!("[ERROR] {}", e),
        }
    }
}

// Returns the chosen product's name, unless it is already active.
fn choose_product(session: &Session) -> Option<String> {
    let names: Vec<String> = session
        .products()
        .iter()
        .map(|product| product.name.clone())
        .collect();
    println!("Products:");
    for (i, name) in names.iter().enumerate() {
        println!("  {}: {}", i, name);
    }

    let choice = prompt("Select a product (number): ").ok()?;
    let name = match choice.parse::<usize>() {
        Ok(i) if i < names.len() => names[i].clone(),
        _ => {
            eprintln!("[ERROR] Invalid product selection.");
            return None;
        }
    };
    (name != session.product().name).then_some(name)
}

/// Stderr for log lines. In raw mode the terminal no longer turns `\n` into
/// a carriage return plus line feed, so the writer does it.
struct TerminalStderr;

impl Write for TerminalStderr {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut stderr = io::stderr().lock();
        if is_raw_mode_enabled().unwrap_or(false) {
            stderr.write_all(&with_carriage_returns(buf))?;
        } else {
            stderr.write_all(buf)?;
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        io::stderr().flush()
    }
}

fn with_carriage_returns(buf: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(buf.len() + 8);
    let mut previous = None;
    for &byte in buf {
        if byte == b'\n' && previous != Some(b'\r') {
            out.push(b'\r');
        }
        out.push(byte);
        previous = Some(byte);
    }
    out
}
