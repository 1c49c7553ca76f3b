//! Configuration errors
//!
//! Everything in here is fatal before the first connection attempt: a
//! value the device layer cannot express is rejected while the options are
//! still being validated, never halfway through reconfiguring the device.

/// Invalid or unloadable configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid baud rate: {0}")]
    InvalidBaudRate(u32),

    #[error("Invalid data bits: {0}")]
    InvalidDataBits(u8),

    #[error("Invalid parity: {0}")]
    InvalidParity(String),

    #[error("Invalid stop bits: {0}")]
    InvalidStopBits(u8),

    #[error("Invalid flow control: {0}")]
    InvalidFlow(String),

    #[error("Unknown mapping flag {0}")]
    UnknownMapping(String),

    #[error("Invalid timestamp format: {0}")]
    InvalidTimestamp(String),

    #[error("Invalid socket address: {0}")]
    InvalidSocket(String),

    #[error("No device given")]
    MissingDevice,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
