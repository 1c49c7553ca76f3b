//! Session log file

use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::Local;

/// Appends received and echoed bytes to a file
pub struct LogSink {
    writer: BufWriter<File>,
}

impl LogSink {
    /// Open `path` for appending, creating it if needed
    pub fn create(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref();
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        tracing::debug!("Logging to {}", path.display());
        Ok(Self {
            writer: BufWriter::new(file),
        })
    }

    /// Default log file name for a device, e.g. `ttybridge_ttyUSB0_2024-03-09T14:05:07.log`
    pub fn default_path(device: &str) -> PathBuf {
        let name = Path::new(device)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "device".to_string());
        let date = Local::now().format("%Y-%m-%dT%H:%M:%S");
        PathBuf::from(format!("ttybridge_{name}_{date}.log"))
    }

    pub fn put(&mut self, byte: u8) -> io::Result<()> {
        self.writer.write_all(&[byte])
    }

    pub fn put_str(&mut self, text: &str) -> io::Result<()> {
        self.writer.write_all(text.as_bytes())
    }

    pub fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }
}

impl Drop for LogSink {
    fn drop(&mut self) {
        let _ = self.writer.flush();
    }
}
