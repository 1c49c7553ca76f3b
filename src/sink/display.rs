//! Local display
//!
//! Renders device bytes in the active print mode and prints operator
//! messages. The terminal is in raw mode, so every line ends in CR LF.

use std::io::{self, Write};

use chrono::Local;

use crate::timestamp::wall_clock;
use crate::transform::encode_hex;

/// How received and echoed bytes are shown
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PrintMode {
    /// Bytes are written to the terminal as they are
    #[default]
    Normal,
    /// Bytes are shown as hex pairs; typed hex pairs are sent as bytes
    Hex,
}

impl PrintMode {
    pub fn toggled(self) -> Self {
        match self {
            PrintMode::Normal => PrintMode::Hex,
            PrintMode::Hex => PrintMode::Normal,
        }
    }
}

const BOLD: &str = "\x1b[1m";
const RESET: &str = "\x1b[0m";

/// The operator's terminal
#[derive(Debug)]
pub struct Display<W: Write> {
    out: W,
    /// Use ANSI attributes for messages
    color: bool,
    /// Device output has been printed since the last message
    tainted: bool,
}

impl<W: Write> Display<W> {
    pub fn new(out: W, color: bool) -> Self {
        Self {
            out,
            color,
            tainted: false,
        }
    }

    /// Render one byte in the given print mode
    pub fn put(&mut self, mode: PrintMode, byte: u8) -> io::Result<()> {
        match mode {
            PrintMode::Normal => self.out.write_all(&[byte])?,
            PrintMode::Hex => self.out.write_all(&encode_hex(byte))?,
        }
        self.tainted = true;
        Ok(())
    }

    /// Write text verbatim (timestamp prefixes)
    pub fn write_str(&mut self, text: &str) -> io::Result<()> {
        self.out.write_all(text.as_bytes())?;
        self.tainted = true;
        Ok(())
    }

    /// Reset the terminal (`ESC c`)
    pub fn clear(&mut self) -> io::Result<()> {
        self.out.write_all(b"\x1bc")?;
        self.tainted = false;
        self.out.flush()
    }

    /// Print a timestamped status line
    pub fn message(&mut self, text: &str) -> io::Result<()> {
        self.line("", text)
    }

    /// Print a timestamped warning line
    pub fn warning(&mut self, text: &str) -> io::Result<()> {
        self.line("Warning: ", text)
    }

    fn line(&mut self, prefix: &str, text: &str) -> io::Result<()> {
        if self.tainted {
            self.out.write_all(b"\r\n")?;
            self.tainted = false;
        }
        let now = wall_clock(&Local::now());
        if self.color {
            write!(self.out, "{BOLD}[{now}] {prefix}{text}{RESET}\r\n")?;
        } else {
            write!(self.out, "[{now}] {prefix}{text}\r\n")?;
        }
        self.out.flush()
    }

    pub fn flush(&mut self) -> io::Result<()> {
        self.out.flush()
    }

    pub fn get_ref(&self) -> &W {
        &self.out
    }

    pub fn get_mut(&mut self) -> &mut W {
        &mut self.out
    }
}
