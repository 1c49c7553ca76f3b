//! Application glue module
//!
//! Configuration, command line and device discovery.

mod cli;
mod config;
mod devices;

pub use cli::Cli;
pub use config::{Config, ConfigFile, Overrides};
pub use devices::{list_serial_devices, SERIAL_DEVICE_DIR};
