//! Command line interface

use std::path::PathBuf;

use clap::Parser;

use super::config::Overrides;

/// Serial device bridge for the terminal
#[derive(Debug, Parser)]
#[command(name = "ttybridge", version, about)]
pub struct Cli {
    /// Serial device path or configuration profile name
    #[arg(required_unless_present = "list_devices")]
    pub device: Option<String>,

    /// Baud rate
    #[arg(short, long)]
    pub baudrate: Option<u32>,

    /// Data bits (5, 6, 7 or 8)
    #[arg(short, long)]
    pub databits: Option<u8>,

    /// Flow control (none, soft or hard)
    #[arg(short, long)]
    pub flow: Option<String>,

    /// Stop bits (1 or 2)
    #[arg(short, long)]
    pub stopbits: Option<u8>,

    /// Parity (none, odd or even)
    #[arg(short, long)]
    pub parity: Option<String>,

    /// Delay after each transmitted byte in milliseconds
    #[arg(short, long, value_name = "MS")]
    pub output_delay: Option<u64>,

    /// Do not wait for the device or reconnect to it
    #[arg(short, long)]
    pub no_autoconnect: bool,

    /// Echo typed characters locally
    #[arg(short = 'e', long)]
    pub local_echo: bool,

    /// Prefix each received line with a timestamp
    /// (24hour, 24hour-start, 24hour-delta or iso8601)
    #[arg(
        short,
        long,
        value_name = "FORMAT",
        num_args = 0..=1,
        default_missing_value = "24hour",
        require_equals = true
    )]
    pub timestamp: Option<String>,

    /// Log received data to a file
    #[arg(short, long)]
    pub log: bool,

    /// Log file path, implies --log
    #[arg(long, value_name = "FILE")]
    pub log_file: Option<PathBuf>,

    /// Comma separated mapping flags
    /// (INLCR, IGNCR, ICRNL, OCRNL, ODELBS, INLCRNL, ONLCRNL)
    #[arg(short, long, value_name = "FLAGS")]
    pub map: Option<String>,

    /// Start in hexadecimal mode
    #[arg(short = 'x', long)]
    pub hexadecimal: bool,

    /// Mirror the device on a socket (unix:PATH, inet:PORT or inet6:PORT)
    #[arg(short = 'S', long, value_name = "ADDRESS")]
    pub socket: Option<String>,

    /// Configuration file
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// List available serial devices
    #[arg(short = 'L', long)]
    pub list_devices: bool,

    /// Print status messages without ANSI attributes
    #[arg(long)]
    pub no_color: bool,
}

impl Cli {
    /// The options given on the command line, as a configuration layer
    pub fn overrides(&self) -> Overrides {
        let flag = |set: bool| set.then_some(true);

        Overrides {
            device: None,
            baudrate: self.baudrate,
            databits: self.databits,
            flow: self.flow.clone(),
            stopbits: self.stopbits,
            parity: self.parity.clone(),
            output_delay: self.output_delay,
            no_autoconnect: flag(self.no_autoconnect),
            local_echo: flag(self.local_echo),
            timestamp: self.timestamp.clone(),
            log: flag(self.log || self.log_file.is_some()),
            log_file: self.log_file.clone(),
            map: self.map.clone(),
            hex_mode: flag(self.hexadecimal),
            socket: self.socket.clone(),
            color: self.no_color.then_some(false),
        }
    }
}
