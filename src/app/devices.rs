//! Serial device discovery

use std::io;
use std::path::{Path, PathBuf};

/// Directory with stable, per-adapter names of serial devices
#[cfg(target_os = "linux")]
pub const SERIAL_DEVICE_DIR: &str = "/dev/serial/by-id";

#[cfg(not(target_os = "linux"))]
pub const SERIAL_DEVICE_DIR: &str = "/dev";

/// List serial devices found on this host, sorted by path
///
/// A missing directory means no adapters are plugged in and yields an
/// empty list.
pub fn list_serial_devices() -> io::Result<Vec<PathBuf>> {
    list_in(Path::new(SERIAL_DEVICE_DIR))
}

fn list_in(dir: &Path) -> io::Result<Vec<PathBuf>> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };

    let mut devices = Vec::new();
    for entry in entries {
        let entry = entry?;
        if is_candidate(&entry.file_name().to_string_lossy()) {
            devices.push(entry.path());
        }
    }
    devices.sort();
    Ok(devices)
}

#[cfg(target_os = "linux")]
fn is_candidate(_name: &str) -> bool {
    true
}

#[cfg(not(target_os = "linux"))]
fn is_candidate(name: &str) -> bool {
    name.starts_with("tty.")
}
