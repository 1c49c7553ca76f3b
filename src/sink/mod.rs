//! Output collaborators
//!
//! Where received bytes end up besides the device: the local display, an
//! optional log file and an optional socket mirror.

mod display;
mod log;
mod socket;

pub use display::{Display, PrintMode};
pub use log::LogSink;
pub use socket::{SocketAddress, SocketMirror, MAX_CLIENTS};
