//! Session state and per-source handlers
//!
//! A `Session` owns everything that outlives a single connection: byte
//! counters, print mode, the command interpreter, the hex accumulator and
//! the display, log and socket sinks. The event loop hands it bytes from
//! each source together with the device, if one is connected.

mod event_loop;

use std::io::{self, Write};
use std::os::fd::BorrowedFd;

use crate::app::Config;
use crate::command::{Command, Interpreter, Step};
use crate::device::{Device, DeviceError, Line, CHUNK_SIZE};
use crate::error::ConfigError;
use crate::sink::{Display, LogSink, PrintMode, SocketMirror};
use crate::timestamp::{Clock, TimestampMode};
use crate::transform::{HexDecoder, Mappings, Outbound};

pub use event_loop::{acquire, connect, run, wait_for_device, Exit, Waiter};

/// Error type for a bridge session
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Device(#[from] DeviceError),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Poll failed: {0}")]
    Poll(#[source] nix::Error),

    #[error("Could not configure terminal: {0}")]
    Console(#[source] nix::Error),

    #[error("Device disconnected")]
    Disconnected,
}

/// Whether the session should keep going after a batch of input
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Quit,
}

/// Byte totals, kept for the whole process lifetime
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Stats {
    /// Bytes read from the device
    pub rx_total: u64,
    /// Bytes accepted by the device for transmission
    pub tx_total: u64,
}

/// State of the bridge between the local terminal and a serial device
pub struct Session<W: Write> {
    config: Config,
    mappings: Mappings,
    stats: Stats,
    print_mode: PrintMode,
    interpreter: Interpreter,
    hex: HexDecoder,
    timestamp: TimestampMode,
    pending_timestamp: bool,
    clock: Clock,
    local_echo: bool,
    /// Local input comes from a terminal and is scanned for commands
    interactive: bool,
    display: Display<W>,
    log: Option<LogSink>,
    socket: Option<SocketMirror>,
}

impl<W: Write> Session<W> {
    /// Create a session, opening the log file and socket mirror if configured
    pub fn new(config: Config, display: Display<W>, interactive: bool) -> Result<Self, SessionError> {
        let mappings: Mappings = config.map.parse()?;
        let timestamp = config.timestamp_mode()?;

        let log = if config.log {
            let path = config
                .log_file
                .clone()
                .unwrap_or_else(|| LogSink::default_path(&config.device));
            Some(LogSink::create(path)?)
        } else {
            None
        };

        let socket = match config.socket_address()? {
            Some(address) => Some(SocketMirror::bind(&address)?),
            None => None,
        };

        Ok(Self {
            mappings,
            stats: Stats::default(),
            print_mode: PrintMode::default(),
            interpreter: Interpreter::new(),
            hex: HexDecoder::new(),
            timestamp,
            pending_timestamp: false,
            clock: Clock::new(),
            local_echo: config.local_echo,
            interactive,
            display,
            log,
            socket,
            config,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn stats(&self) -> Stats {
        self.stats
    }

    pub fn print_mode(&self) -> PrintMode {
        self.print_mode
    }

    pub fn timestamp_mode(&self) -> TimestampMode {
        self.timestamp
    }

    pub fn local_echo(&self) -> bool {
        self.local_echo
    }

    pub fn is_interactive(&self) -> bool {
        self.interactive
    }

    pub fn log(&self) -> Option<&LogSink> {
        self.log.as_ref()
    }

    pub fn display(&self) -> &Display<W> {
        &self.display
    }

    pub fn display_mut(&mut self) -> &mut Display<W> {
        &mut self.display
    }

    /// Reset per-connection state and announce the connection
    pub fn on_connect(&mut self) -> io::Result<()> {
        self.print_mode = if self.config.hex_mode {
            PrintMode::Hex
        } else {
            PrintMode::Normal
        };
        self.hex.reset();
        self.pending_timestamp = self.timestamp.is_enabled();
        self.display.message("Connected")
    }

    pub fn on_disconnect(&mut self) -> io::Result<()> {
        self.display.message("Disconnected")
    }

    /// Read one chunk from the device and pass it to the sinks
    pub fn read_device(&mut self, device: &Device) -> Result<(), SessionError> {
        let mut buf = [0u8; CHUNK_SIZE];
        let n = device.read(&mut buf)?;
        self.stats.rx_total += n as u64;
        self.process_device_input(&buf[..n])?;
        Ok(())
    }

    /// Route received bytes to the display, log and socket sinks
    ///
    /// The log and socket see the bytes as received; input mappings only
    /// change what is displayed.
    pub fn process_device_input(&mut self, data: &[u8]) -> io::Result<()> {
        for &byte in data {
            if self.pending_timestamp && byte != b'\n' && byte != b'\r' {
                self.emit_timestamp()?;
            }

            for &shown in self.mappings.map_inbound(&byte) {
                self.display.put(self.print_mode, shown)?;
            }
            if let Some(log) = &mut self.log {
                log.put(byte)?;
            }
            if let Some(socket) = &mut self.socket {
                socket.write(byte);
            }

            if byte == b'\n' && self.timestamp.is_enabled() {
                self.pending_timestamp = true;
            }
        }
        self.display.flush()
    }

    /// Route local input through the command interpreter to the device
    ///
    /// Without a device, commands still run but forwarded bytes are dropped.
    pub fn process_local_input(
        &mut self,
        data: &[u8],
        mut device: Option<&mut Device>,
    ) -> Result<Flow, SessionError> {
        for &byte in data {
            let step = if self.interactive {
                self.interpreter.feed(byte)
            } else {
                Step::Forward(byte)
            };

            match step {
                Step::Forward(byte) => {
                    if let Some(device) = device.as_deref_mut() {
                        self.forward(byte, device)?;
                    }
                },
                Step::Swallow => {},
                Step::Execute(command) => {
                    if self.execute(command, device.as_deref_mut())? == Flow::Quit {
                        return Ok(Flow::Quit);
                    }
                },
            }
        }
        Ok(Flow::Continue)
    }

    /// Map, echo and queue one byte for the device
    ///
    /// In hex mode the byte must be a hex digit and every second digit
    /// produces one byte that is sent unmapped. Anything else, CR and LF
    /// included, is dropped with a warning. In normal mode the output
    /// mappings apply. `tx_total` grows by what the device reports as
    /// accepted, one byte at a time.
    pub fn forward(&mut self, byte: u8, device: &mut Device) -> Result<(), SessionError> {
        if self.print_mode == PrintMode::Hex {
            return match self.hex.push(byte) {
                Ok(Some(decoded)) => self.transmit(decoded, device),
                Ok(None) => Ok(()),
                Err(invalid) => {
                    self.display.warning(&invalid.to_string())?;
                    Ok(())
                },
            };
        }

        match self.mappings.map_outbound(byte) {
            Outbound::CrLf => {
                self.transmit(b'\r', device)?;
                self.transmit(b'\n', device)
            },
            Outbound::Byte(byte) => self.transmit(byte, device),
        }
    }

    fn transmit(&mut self, byte: u8, device: &mut Device) -> Result<(), SessionError> {
        self.echo(byte)?;
        let n = device.write(&[byte])?;
        self.stats.tx_total += n as u64;
        Ok(())
    }

    /// Descriptors of the socket mirror, listener first
    pub fn socket_fds(&self) -> Vec<BorrowedFd<'_>> {
        self.socket.as_ref().map(SocketMirror::fds).unwrap_or_default()
    }

    /// Service socket readiness, returning a byte a client sent
    pub fn service_socket(&mut self, ready: &[bool]) -> Option<u8> {
        self.socket.as_mut().and_then(|socket| socket.service(ready))
    }

    /// Flush the display and log at the end of a batch
    pub fn flush_sinks(&mut self) -> io::Result<()> {
        self.display.flush()?;
        if let Some(log) = &mut self.log {
            log.flush()?;
        }
        Ok(())
    }

    /// Run a key command
    pub fn execute(
        &mut self,
        command: Command,
        device: Option<&mut Device>,
    ) -> Result<Flow, SessionError> {
        tracing::debug!("Executing command {:?}", command);

        match command {
            Command::Help => {
                self.display.message("Key commands:")?;
                for cmd in Command::ALL {
                    let line = format!(" ctrl-t {}   {}", cmd.key() as char, cmd.description());
                    self.display.message(&line)?;
                }
            },
            Command::ClearScreen => self.display.clear()?,
            Command::ShowConfig => {
                let mut current = self.config.clone();
                current.local_echo = self.local_echo;
                current.timestamp = self.timestamp.to_string();
                current.hex_mode = self.print_mode == PrintMode::Hex;
                self.display.message("Configuration:")?;
                for line in current.describe() {
                    self.display.message(&line)?;
                }
            },
            Command::ToggleEcho => {
                self.local_echo = !self.local_echo;
                let state = if self.local_echo { "on" } else { "off" };
                self.display
                    .message(&format!("Switched local echo {}", state))?;
            },
            Command::ToggleHex => {
                self.print_mode = self.print_mode.toggled();
                self.hex.reset();
                let text = match self.print_mode {
                    PrintMode::Hex => "Switched to hexadecimal mode",
                    PrintMode::Normal => "Switched to normal mode",
                };
                self.display.message(text)?;
            },
            Command::ShowStats => {
                self.display.message("Statistics:")?;
                self.display
                    .message(&format!(" Sent {} bytes", self.stats.tx_total))?;
                self.display
                    .message(&format!(" Received {} bytes", self.stats.rx_total))?;
            },
            Command::CycleTimestamp => {
                self.timestamp = self.timestamp.next();
                if self.timestamp == TimestampMode::Hour24Start {
                    self.clock.reset();
                }
                self.pending_timestamp = self.timestamp.is_enabled();
                self.display
                    .message(&format!("Switched timestamp mode to {}", self.timestamp))?;
            },
            Command::ShowVersion => {
                self.display
                    .message(&format!("ttybridge v{}", env!("CARGO_PKG_VERSION")))?;
            },
            Command::Quit => return Ok(Flow::Quit),
            // The interpreter forwards the sentinel byte itself
            Command::SendSentinel => {},
            Command::ShowLines
            | Command::ToggleDtr
            | Command::ToggleRts
            | Command::SendBreak => match device {
                Some(device) => self.execute_on_device(command, device)?,
                None => self.display.warning("Not connected")?,
            },
        }
        Ok(Flow::Continue)
    }

    fn execute_on_device(&mut self, command: Command, device: &mut Device) -> Result<(), SessionError> {
        let result = match command {
            Command::ShowLines => device.modem_lines().map(|lines| {
                lines
                    .entries()
                    .into_iter()
                    .map(|(name, high)| format!(" {}: {}", name, level(high)))
                    .collect::<Vec<_>>()
            }),
            Command::ToggleDtr => toggle(device, Line::Dtr),
            Command::ToggleRts => toggle(device, Line::Rts),
            Command::SendBreak => device.send_break().map(|()| Vec::new()),
            _ => Ok(Vec::new()),
        };

        match result {
            Ok(lines) => {
                if command == Command::ShowLines {
                    self.display.message("Line states:")?;
                }
                for line in lines {
                    self.display.message(&line)?;
                }
            },
            // Losing the device is handled by the loop
            Err(e) if e.is_loss() => return Err(e.into()),
            Err(e) => self.display.warning(&e.to_string())?,
        }
        Ok(())
    }

    fn echo(&mut self, byte: u8) -> io::Result<()> {
        if !self.local_echo {
            return Ok(());
        }
        self.display.put(self.print_mode, byte)?;
        if let Some(log) = &mut self.log {
            log.put(byte)?;
        }
        Ok(())
    }

    fn emit_timestamp(&mut self) -> io::Result<()> {
        self.pending_timestamp = false;
        if let Some(text) = self.clock.render(self.timestamp) {
            let stamp = format!("[{}] ", text);
            self.display.write_str(&stamp)?;
            if let Some(log) = &mut self.log {
                log.put_str(&stamp)?;
            }
        }
        Ok(())
    }
}

fn level(high: bool) -> &'static str {
    if high {
        "HIGH"
    } else {
        "LOW"
    }
}

fn toggle(device: &Device, line: Line) -> Result<Vec<String>, DeviceError> {
    let high = device.toggle_line(line)?;
    Ok(vec![format!("set {} to {}", line.name(), level(high))])
}
