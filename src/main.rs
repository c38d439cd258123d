use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use serial_com_listener::config::{ConfigLoader, LogFormat};
use serial_com_listener::error::SinkError;
use serial_com_listener::port::{FlowControl, NativePort, PortSettings};
use serial_com_listener::{
    logging, Config, LineEvents, ListenerManager, ListenerSink, PortEvent, PortEventSink,
    RuntimeAttach,
};
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

// Command-line arguments
#[derive(Parser, Debug)]
#[command(
    name = "serial-listen",
    version,
    about = "Listen to serial ports and watch them come and go.",
    long_about = "Registers native listener threads on a serial port and prints received data, read errors, control line changes and hot-plug notifications as JSON lines on stdout. Logs go to stderr."
)]
struct Cli {
    /// Configuration file. Defaults to the standard search path.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log filter, e.g. "debug" or "serial_com_listener=trace".
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Log format: pretty, compact or json.
    #[arg(long, global = true)]
    log_format: Option<LogFormat>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Open a port and print everything the listeners deliver until Enter is pressed.
    Listen(ListenArgs),
    /// Print hot-plug notifications for a port until Enter is pressed.
    Monitor {
        /// Port to watch, e.g. /dev/ttyUSB0 or COM3.
        port: String,
    },
    /// List serial ports known to the OS.
    Ports,
    /// Print the effective configuration as TOML.
    Config,
}

#[derive(Args, Debug)]
struct ListenArgs {
    /// Port to open, e.g. /dev/ttyUSB0 or COM3.
    port: String,

    #[arg(short, long, default_value_t = 9600)]
    baud: u32,

    /// Data bits, parity and stop bits, e.g. 8N1.
    #[arg(long, default_value = "8N1")]
    framing: String,

    #[arg(long, default_value = "none")]
    flow: FlowControl,

    /// Do not register the data listener.
    #[arg(long)]
    no_data: bool,

    /// Do not register the line event listener.
    #[arg(long)]
    no_events: bool,

    /// Only report these lines (comma separated: cts,dsr,dcd,ri).
    #[arg(long, value_delimiter = ',')]
    lines: Vec<String>,
}

/// One line of output.
#[derive(Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum Record<'a> {
    Data {
        port: &'a str,
        len: usize,
        hex: String,
        text: String,
    },
    DataError {
        port: &'a str,
        code: i32,
    },
    Lines {
        port: &'a str,
        mask: u8,
        lines: String,
    },
    Port {
        port: &'a str,
        event: PortEvent,
        code: i32,
    },
}

#[derive(Serialize)]
struct Stamped<'a> {
    timestamp: String,
    #[serde(flatten)]
    record: Record<'a>,
}

fn emit(record: Record<'_>) -> Result<(), SinkError> {
    let line = serde_json::to_string(&Stamped {
        timestamp: Utc::now().to_rfc3339(),
        record,
    })
    .map_err(|e| SinkError::rejected(e.to_string()))?;
    let mut out = io::stdout().lock();
    writeln!(out, "{}", line).map_err(|e| SinkError::rejected(e.to_string()))
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

struct JsonLinesSink {
    port: String,
}

impl RuntimeAttach for JsonLinesSink {}

impl ListenerSink for JsonLinesSink {
    fn deliver_data(&self, data: &[u8]) -> Result<(), SinkError> {
        emit(Record::Data {
            port: &self.port,
            len: data.len(),
            hex: hex(data),
            text: String::from_utf8_lossy(data).into_owned(),
        })
    }

    fn deliver_data_error(&self, code: i32) -> Result<(), SinkError> {
        emit(Record::DataError {
            port: &self.port,
            code,
        })
    }

    fn deliver_event(&self, events: LineEvents) -> Result<(), SinkError> {
        emit(Record::Lines {
            port: &self.port,
            mask: events.bits(),
            lines: events.to_string(),
        })
    }
}

impl PortEventSink for JsonLinesSink {
    fn on_port_event(&self, event: PortEvent) -> Result<(), SinkError> {
        emit(Record::Port {
            port: &self.port,
            event,
            code: event.code(),
        })
    }
}

fn parse_lines(names: &[String]) -> Result<LineEvents, String> {
    names.iter().try_fold(LineEvents::NONE, |mask, name| {
        let line = match name.trim().to_ascii_lowercase().as_str() {
            "cts" => LineEvents::CTS,
            "dsr" => LineEvents::DSR,
            "dcd" | "cd" => LineEvents::DCD,
            "ri" => LineEvents::RI,
            other => return Err(format!("unknown control line '{}'", other)),
        };
        Ok(mask | line)
    })
}

fn wait_for_enter() -> io::Result<()> {
    eprintln!("Press Enter to stop.");
    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    Ok(())
}

fn load_config(cli: &Cli) -> Result<Config, Box<dyn std::error::Error>> {
    let mut config = match &cli.config {
        Some(path) => ConfigLoader::load_from(path)?.into_config(),
        None => ConfigLoader::load()?.into_config(),
    };
    if let Some(level) = &cli.log_level {
        config.logging.level = level.clone();
    }
    if let Some(format) = cli.log_format {
        config.logging.format = format;
    }
    Ok(config)
}

fn listen(manager: &ListenerManager, args: &ListenArgs) -> Result<(), Box<dyn std::error::Error>> {
    let settings = PortSettings::default()
        .with_baud_rate(args.baud)
        .with_framing(&args.framing)?;
    let settings = PortSettings {
        flow_control: args.flow,
        ..settings
    };
    let port = NativePort::open(&args.port, settings)?;
    let handle = port.handle();
    let sink = Arc::new(JsonLinesSink {
        port: args.port.clone(),
    });

    if !args.no_data {
        manager.register_data_listener(handle, sink.clone())?;
    }
    if !args.no_events {
        manager.register_event_listener(handle, sink.clone())?;
        if !args.lines.is_empty() {
            manager.set_event_mask(handle, parse_lines(&args.lines)?)?;
        }
        let status = manager.line_status(handle)?;
        info!(port = %args.port, ?status, "initial line status");
    }
    info!(port = %args.port, %handle, baud = args.baud, framing = %port.settings().framing(), "listening");

    wait_for_enter()?;

    if !args.no_events {
        manager.unregister_event_listener(handle)?;
    }
    if !args.no_data {
        manager.unregister_data_listener(handle)?;
    }
    drop(port);
    Ok(())
}

fn monitor(manager: &ListenerManager, port: &str) -> Result<(), Box<dyn std::error::Error>> {
    let sink = Arc::new(JsonLinesSink {
        port: port.to_string(),
    });
    manager.start_port_monitor(port, sink)?;
    wait_for_enter()?;
    manager.stop_port_monitor(port)?;
    Ok(())
}

fn list_ports() -> Result<(), Box<dyn std::error::Error>> {
    let ports = serial_com_listener::port::available_ports()?;
    if ports.is_empty() {
        eprintln!("No serial ports found.");
    }
    for port in ports {
        let kind = match port.port_type {
            serialport::SerialPortType::UsbPort(info) => format!(
                "usb {:04x}:{:04x} {}",
                info.vid,
                info.pid,
                info.product.unwrap_or_default()
            ),
            serialport::SerialPortType::PciPort => "pci".to_string(),
            serialport::SerialPortType::BluetoothPort => "bluetooth".to_string(),
            serialport::SerialPortType::Unknown => "unknown".to_string(),
        };
        println!("{}\t{}", port.port_name, kind.trim_end());
    }
    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = load_config(&cli)?;

    if let Command::Config = cli.command {
        print!("{}", toml::to_string_pretty(&config)?);
        return Ok(());
    }

    logging::init(&config.logging).map_err(|e| e as Box<dyn std::error::Error>)?;

    match &cli.command {
        Command::Listen(args) => {
            let manager = ListenerManager::from_config(&config);
            listen(&manager, args)
        }
        Command::Monitor { port } => {
            let manager = ListenerManager::from_config(&config);
            monitor(&manager, port)
        }
        Command::Ports => list_ports(),
        Command::Config => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_lines() {
        let names = vec!["cts".to_string(), "RI".to_string()];
        assert_eq!(parse_lines(&names).unwrap(), LineEvents::CTS | LineEvents::RI);
        assert!(parse_lines(&["rts".to_string()]).is_err());
    }

    #[test]
    fn test_hex() {
        assert_eq!(hex(&[0x00, 0xab, 0x7f]), "00ab7f");
    }

    #[test]
    fn test_cli_parses_listen() {
        let cli = Cli::parse_from([
            "serial-listen",
            "listen",
            "/dev/ttyUSB0",
            "--baud",
            "115200",
            "--lines",
            "cts,dsr",
        ]);
        match cli.command {
            Command::Listen(args) => {
                assert_eq!(args.baud, 115_200);
                assert_eq!(args.lines, vec!["cts", "dsr"]);
                assert_eq!(args.flow, FlowControl::None);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }
}
