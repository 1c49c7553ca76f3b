//! Serial device session
//!
//! Owns the open descriptor of the character device, its advisory lock and
//! the line settings captured at open time. All interactive behaviour lives
//! above this layer; the device itself is always put in raw mode.

mod baud;
mod unix;

use std::fmt;
use std::str::FromStr;

pub use baud::{custom_rates_supported, resolve as resolve_baudrate, Speed, STANDARD_RATES};
pub use unix::Device;

use crate::error::ConfigError;
use crate::transform::Mappings;

/// Size of a single read from any source
pub const CHUNK_SIZE: usize = 8192;

/// Capacity of the device write buffer
pub const WRITE_BUFFER_SIZE: usize = 2 * CHUNK_SIZE;

/// Error type for device operations
#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    #[error("Could not open tty device ({0})")]
    Unavailable(#[source] nix::Error),

    #[error("Not a tty device")]
    NotATty,

    #[error("Device file is locked by another process")]
    Locked,

    #[error("Could not lock device file ({0})")]
    Lock(#[source] nix::Error),

    #[error("Unsupported baud rate: {0}")]
    UnsupportedRate(u32),

    #[error("Could not apply port settings ({0})")]
    Termios(#[source] nix::Error),

    #[error("Could not read from tty device ({0})")]
    Read(#[source] nix::Error),

    #[error("Could not write to tty device ({0})")]
    Write(#[source] nix::Error),

    #[error("tty device hung up")]
    Hangup,

    #[error("Could not get line state ({0})")]
    ModemLines(#[source] nix::Error),

    #[error("Could not send break ({0})")]
    Break(#[source] nix::Error),

    #[error("Device is not connected")]
    Closed,
}

impl DeviceError {
    /// Whether the error means the device went away during a session
    /// (most likely unplugged) rather than a setup failure.
    pub fn is_loss(&self) -> bool {
        matches!(
            self,
            DeviceError::Read(_) | DeviceError::Write(_) | DeviceError::Hangup | DeviceError::Closed
        )
    }
}

/// Result type for device operations
pub type DeviceResult<T> = Result<T, DeviceError>;

/// Number of data bits per character
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataBits {
    Five,
    Six,
    Seven,
    Eight,
}

impl TryFrom<u8> for DataBits {
    type Error = ConfigError;

    fn try_from(bits: u8) -> Result<Self, Self::Error> {
        match bits {
            5 => Ok(DataBits::Five),
            6 => Ok(DataBits::Six),
            7 => Ok(DataBits::Seven),
            8 => Ok(DataBits::Eight),
            other => Err(ConfigError::InvalidDataBits(other)),
        }
    }
}

impl From<DataBits> for u8 {
    fn from(bits: DataBits) -> u8 {
        match bits {
            DataBits::Five => 5,
            DataBits::Six => 6,
            DataBits::Seven => 7,
            DataBits::Eight => 8,
        }
    }
}

/// Parity checking mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Parity {
    None,
    Odd,
    Even,
}

impl FromStr for Parity {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(Parity::None),
            "odd" => Ok(Parity::Odd),
            "even" => Ok(Parity::Even),
            other => Err(ConfigError::InvalidParity(other.to_string())),
        }
    }
}

impl fmt::Display for Parity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Parity::None => "none",
            Parity::Odd => "odd",
            Parity::Even => "even",
        })
    }
}

/// Number of stop bits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopBits {
    One,
    Two,
}

impl TryFrom<u8> for StopBits {
    type Error = ConfigError;

    fn try_from(bits: u8) -> Result<Self, Self::Error> {
        match bits {
            1 => Ok(StopBits::One),
            2 => Ok(StopBits::Two),
            other => Err(ConfigError::InvalidStopBits(other)),
        }
    }
}

impl From<StopBits> for u8 {
    fn from(bits: StopBits) -> u8 {
        match bits {
            StopBits::One => 1,
            StopBits::Two => 2,
        }
    }
}

/// Flow control mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowControl {
    None,
    /// XON/XOFF
    Soft,
    /// RTS/CTS
    Hard,
}

impl FromStr for FlowControl {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(FlowControl::None),
            "soft" => Ok(FlowControl::Soft),
            "hard" => Ok(FlowControl::Hard),
            other => Err(ConfigError::InvalidFlow(other.to_string())),
        }
    }
}

impl fmt::Display for FlowControl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FlowControl::None => "none",
            FlowControl::Soft => "soft",
            FlowControl::Hard => "hard",
        })
    }
}

/// Validated transmission parameters for a device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineConfig {
    pub speed: Speed,
    pub databits: DataBits,
    pub parity: Parity,
    pub stopbits: StopBits,
    pub flow: FlowControl,
    pub mappings: Mappings,
}

impl Default for LineConfig {
    fn default() -> Self {
        Self {
            speed: Speed::Standard(115200),
            databits: DataBits::Eight,
            parity: Parity::None,
            stopbits: StopBits::One,
            flow: FlowControl::None,
            mappings: Mappings::default(),
        }
    }
}

/// Modem control line that can be driven from the host side
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Line {
    Dtr,
    Rts,
}

impl Line {
    pub fn name(self) -> &'static str {
        match self {
            Line::Dtr => "DTR",
            Line::Rts => "RTS",
        }
    }
}

/// Snapshot of the modem control and status lines
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ModemLines {
    pub dtr: bool,
    pub rts: bool,
    pub cts: bool,
    pub dsr: bool,
    pub dcd: bool,
    pub ri: bool,
}

impl ModemLines {
    /// Decode a `TIOCMGET` bit mask
    pub fn from_bits(bits: i32) -> Self {
        use nix::libc;

        Self {
            dtr: bits & libc::TIOCM_DTR != 0,
            rts: bits & libc::TIOCM_RTS != 0,
            cts: bits & libc::TIOCM_CTS != 0,
            dsr: bits & libc::TIOCM_DSR != 0,
            dcd: bits & libc::TIOCM_CAR != 0,
            ri: bits & libc::TIOCM_RNG != 0,
        }
    }

    /// Lines in display order with their names
    pub fn entries(&self) -> [(&'static str, bool); 6] {
        [
            ("DTR", self.dtr),
            ("RTS", self.rts),
            ("CTS", self.cts),
            ("DSR", self.dsr),
            ("DCD", self.dcd),
            ("RI ", self.ri),
        ]
    }
}
