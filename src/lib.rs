//! ttybridge
//!
//! Connects the local terminal to a serial device:
//!
//! - `device`: opening, locking and configuring the tty device
//! - `transform`: byte mappings and hex encoding
//! - `command`: the ctrl-t key command interpreter
//! - `session`: session state and the event loop with reconnect
//! - `sink`: display, log file and socket mirror
//! - `app`: configuration file, command line and device listing

pub mod app;
pub mod command;
pub mod console;
pub mod device;
pub mod error;
pub mod session;
pub mod sink;
pub mod timestamp;
pub mod transform;

pub use app::Config;
pub use device::{Device, DeviceError, LineConfig};
pub use error::ConfigError;
pub use session::{Session, SessionError};
