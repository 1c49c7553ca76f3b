//! Unix serial device implementation
//!
//! Opens, locks and configures a tty character device using POSIX APIs.
//! The saved line settings are put back and the lock released exactly once,
//! either by an explicit `close` or when the `Device` is dropped.

use std::os::fd::{AsFd, AsRawFd, BorrowedFd, FromRawFd, OwnedFd};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use nix::errno::Errno;
use nix::fcntl::{flock, open, FlockArg, OFlag};
use nix::libc;
use nix::poll::{poll, PollFd, PollFlags};
use nix::sys::stat::Mode;
use nix::sys::termios::{
    self, ControlFlags, FlushArg, InputFlags, LocalFlags, OutputFlags, SetArg,
    SpecialCharacterIndices, Termios,
};
use nix::unistd::{isatty, read, write};

use super::baud::{self, Speed};
use super::{
    DataBits, DeviceError, DeviceResult, FlowControl, Line, LineConfig, ModemLines, Parity,
    StopBits, WRITE_BUFFER_SIZE,
};

/// An open, locked serial device
pub struct Device {
    /// The device descriptor, `None` once closed
    fd: Option<OwnedFd>,
    /// Path the device was opened from
    path: PathBuf,
    /// Line settings found on the device at open time
    saved: Termios,
    /// Bytes accepted but not yet written to the device
    buffer: Vec<u8>,
    /// Pacing between single-byte writes, disables buffering
    output_delay: Option<Duration>,
}

impl Device {
    /// Open and lock a tty device
    ///
    /// The device is opened non-blocking, checked to be a terminal, locked
    /// with an exclusive non-blocking advisory lock and flushed of any stale
    /// data. Its current line settings are captured for restoration.
    pub fn open(path: impl AsRef<Path>) -> DeviceResult<Self> {
        let path = path.as_ref();

        let raw = open(
            path,
            OFlag::O_RDWR | OFlag::O_NOCTTY | OFlag::O_NONBLOCK,
            Mode::empty(),
        )
        .map_err(DeviceError::Unavailable)?;
        // SAFETY: open just returned this descriptor and nothing else owns it
        let fd = unsafe { OwnedFd::from_raw_fd(raw) };

        if !isatty(fd.as_raw_fd()).unwrap_or(false) {
            return Err(DeviceError::NotATty);
        }

        match flock(fd.as_raw_fd(), FlockArg::LockExclusiveNonblock) {
            Ok(()) => {},
            Err(e) if e == Errno::EWOULDBLOCK => return Err(DeviceError::Locked),
            Err(e) => return Err(DeviceError::Lock(e)),
        }

        // Stale I/O from a previous user of the port
        if let Err(e) = termios::tcflush(&fd, FlushArg::TCIOFLUSH) {
            tracing::debug!("tcflush failed on {}: {}", path.display(), e);
        }

        let saved = termios::tcgetattr(&fd).map_err(DeviceError::Termios)?;

        tracing::debug!("Opened and locked {}", path.display());

        Ok(Self {
            fd: Some(fd),
            path: path.to_path_buf(),
            saved,
            buffer: Vec::with_capacity(WRITE_BUFFER_SIZE),
            output_delay: None,
        })
    }

    /// Apply raw-mode transmission settings
    ///
    /// The speed is validated before anything is written to the device, so an
    /// unsupported rate leaves the device untouched.
    pub fn configure(&mut self, line: &LineConfig) -> DeviceResult<()> {
        let fd = self.fd()?;

        let standard = match line.speed {
            Speed::Standard(rate) => {
                Some(baud::baud_rate(rate).ok_or(DeviceError::UnsupportedRate(rate))?)
            },
            Speed::Custom(_) if baud::custom_rates_supported() => None,
            Speed::Custom(rate) => return Err(DeviceError::UnsupportedRate(rate)),
        };

        let mut tio = self.saved.clone();
        termios::cfmakeraw(&mut tio);

        tio.input_flags = InputFlags::empty();
        tio.output_flags = OutputFlags::empty();
        tio.local_flags = LocalFlags::empty();

        tio.control_flags.remove(
            ControlFlags::CSIZE
                | ControlFlags::CSTOPB
                | ControlFlags::PARENB
                | ControlFlags::PARODD
                | ControlFlags::CRTSCTS,
        );
        tio.control_flags.insert(ControlFlags::CLOCAL | ControlFlags::CREAD);

        tio.control_flags.insert(match line.databits {
            DataBits::Five => ControlFlags::CS5,
            DataBits::Six => ControlFlags::CS6,
            DataBits::Seven => ControlFlags::CS7,
            DataBits::Eight => ControlFlags::CS8,
        });

        match line.flow {
            FlowControl::Hard => tio.control_flags.insert(ControlFlags::CRTSCTS),
            FlowControl::Soft => tio.input_flags.insert(InputFlags::IXON | InputFlags::IXOFF),
            FlowControl::None => {},
        }

        if line.stopbits == StopBits::Two {
            tio.control_flags.insert(ControlFlags::CSTOPB);
        }

        match line.parity {
            Parity::Odd => tio.control_flags.insert(ControlFlags::PARENB | ControlFlags::PARODD),
            Parity::Even => tio.control_flags.insert(ControlFlags::PARENB),
            Parity::None => {},
        }

        // Input mappings the line discipline can do for us
        if line.mappings.inlcr {
            tio.input_flags.insert(InputFlags::INLCR);
        }
        if line.mappings.igncr {
            tio.input_flags.insert(InputFlags::IGNCR);
        }
        if line.mappings.icrnl {
            tio.input_flags.insert(InputFlags::ICRNL);
        }

        tio.control_chars[SpecialCharacterIndices::VTIME as usize] = 0;
        tio.control_chars[SpecialCharacterIndices::VMIN as usize] = 1;

        if let Some(baud) = standard {
            termios::cfsetspeed(&mut tio, baud).map_err(DeviceError::Termios)?;
        }

        termios::tcsetattr(&fd, SetArg::TCSANOW, &tio).map_err(DeviceError::Termios)?;

        if let Speed::Custom(rate) = line.speed {
            set_custom_speed(fd.as_raw_fd(), rate)?;
        }

        tracing::debug!("Configured {} at {} baud", self.path.display(), line.speed.rate());
        Ok(())
    }

    /// Re-apply the line settings captured at open time
    pub fn restore(&self) -> DeviceResult<()> {
        let fd = self.fd()?;
        termios::tcsetattr(fd, SetArg::TCSANOW, &self.saved).map_err(DeviceError::Termios)
    }

    /// Restore the saved settings, release the lock and close the descriptor
    ///
    /// Calling this on a closed device does nothing.
    pub fn close(&mut self) {
        let Some(fd) = self.fd.take() else {
            return;
        };
        self.buffer.clear();

        if let Err(e) = termios::tcsetattr(&fd, SetArg::TCSANOW, &self.saved) {
            tracing::debug!("Could not restore settings on {}: {}", self.path.display(), e);
        }
        if let Err(e) = flock(fd.as_raw_fd(), FlockArg::Unlock) {
            tracing::debug!("Could not unlock {}: {}", self.path.display(), e);
        }
        drop(fd);

        tracing::debug!("Closed {}", self.path.display());
    }

    /// Whether the descriptor is still open
    pub fn is_connected(&self) -> bool {
        self.fd.is_some()
    }

    /// Path the device was opened from
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Borrow the descriptor for readiness polling
    pub fn fd(&self) -> DeviceResult<BorrowedFd<'_>> {
        self.fd.as_ref().map(|fd| fd.as_fd()).ok_or(DeviceError::Closed)
    }

    /// Write each byte individually, drained and followed by `delay`
    pub fn set_output_delay(&mut self, delay: Option<Duration>) {
        self.output_delay = delay.filter(|d| !d.is_zero());
    }

    /// Number of bytes waiting in the write buffer
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Read from the device (non-blocking)
    ///
    /// Returns the number of bytes read, or 0 if no data is available.
    /// End of file is reported as `DeviceError::Hangup`.
    pub fn read(&self, buf: &mut [u8]) -> DeviceResult<usize> {
        let fd = self.fd()?;
        match read(fd.as_raw_fd(), buf) {
            Ok(0) => Err(DeviceError::Hangup),
            Ok(n) => Ok(n),
            // EAGAIN and EWOULDBLOCK are the same value on Linux
            Err(Errno::EAGAIN) => Ok(0),
            Err(e) => Err(DeviceError::Read(e)),
        }
    }

    /// Queue bytes for the device
    ///
    /// Returns the number of bytes accepted. Without an output delay the bytes
    /// are buffered and the buffer is flushed first if they would not fit.
    pub fn write(&mut self, data: &[u8]) -> DeviceResult<usize> {
        if let Some(delay) = self.output_delay {
            let fd = self.fd()?;
            let mut written = 0;
            for byte in data {
                write_all(fd, std::slice::from_ref(byte))?;
                written += 1;
                if let Err(e) = termios::tcdrain(fd) {
                    tracing::debug!("tcdrain failed: {}", e);
                }
                thread::sleep(delay);
            }
            return Ok(written);
        }

        if self.buffer.len() + data.len() > WRITE_BUFFER_SIZE {
            self.flush()?;
        }
        self.buffer.extend_from_slice(data);
        Ok(data.len())
    }

    /// Write out everything in the write buffer
    ///
    /// The buffer is emptied even when the write fails.
    pub fn flush(&mut self) -> DeviceResult<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        let result = match self.fd.as_ref() {
            Some(fd) => write_all(fd.as_fd(), &self.buffer),
            None => Err(DeviceError::Closed),
        };
        self.buffer.clear();
        result
    }

    /// Read the modem control and status lines
    pub fn modem_lines(&self) -> DeviceResult<ModemLines> {
        Ok(ModemLines::from_bits(self.modem_bits()?))
    }

    /// Invert a modem control line, returning whether it is now high
    pub fn toggle_line(&self, line: Line) -> DeviceResult<bool> {
        let fd = self.fd()?;
        let mask = match line {
            Line::Dtr => libc::TIOCM_DTR,
            Line::Rts => libc::TIOCM_RTS,
        };
        let state = self.modem_bits()? ^ mask;

        // SAFETY: TIOCMSET reads a single c_int from the pointer
        let result = unsafe { libc::ioctl(fd.as_raw_fd(), libc::TIOCMSET as _, &state) };
        if result < 0 {
            return Err(DeviceError::ModemLines(Errno::last()));
        }
        Ok(state & mask != 0)
    }

    /// Transmit a break condition
    pub fn send_break(&self) -> DeviceResult<()> {
        termios::tcsendbreak(self.fd()?, 0).map_err(DeviceError::Break)
    }

    fn modem_bits(&self) -> DeviceResult<libc::c_int> {
        let fd = self.fd()?;
        let mut state: libc::c_int = 0;

        // SAFETY: TIOCMGET writes a single c_int to the pointer
        let result = unsafe { libc::ioctl(fd.as_raw_fd(), libc::TIOCMGET as _, &mut state) };
        if result < 0 {
            Err(DeviceError::ModemLines(Errno::last()))
        } else {
            Ok(state)
        }
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        self.close();
    }
}

/// Write all of `data`, waiting for writability when the device is busy
fn write_all(fd: BorrowedFd<'_>, mut data: &[u8]) -> DeviceResult<()> {
    while !data.is_empty() {
        match write(fd.as_raw_fd(), data) {
            Ok(n) => data = &data[n..],
            Err(Errno::EAGAIN) => {
                let mut fds = [PollFd::new(&fd, PollFlags::POLLOUT)];
                match poll(&mut fds, -1) {
                    Ok(_) | Err(Errno::EINTR) => {},
                    Err(e) => return Err(DeviceError::Write(e)),
                }
            },
            Err(Errno::EINTR) => {},
            Err(e) => return Err(DeviceError::Write(e)),
        }
    }
    Ok(())
}

/// Program an arbitrary rate with `termios2` and `BOTHER`
#[cfg(target_os = "linux")]
fn set_custom_speed(fd: libc::c_int, rate: u32) -> DeviceResult<()> {
    // SAFETY: termios2 is plain old data; TCGETS2 fills it in completely
    let mut tio2: libc::termios2 = unsafe { std::mem::zeroed() };

    // SAFETY: TCGETS2 writes a termios2 to the pointer
    if unsafe { libc::ioctl(fd, libc::TCGETS2 as _, &mut tio2) } < 0 {
        return Err(DeviceError::Termios(Errno::last()));
    }

    tio2.c_cflag &= !libc::CBAUD;
    tio2.c_cflag |= libc::BOTHER;
    tio2.c_ispeed = rate;
    tio2.c_ospeed = rate;

    // SAFETY: TCSETS2 reads a termios2 from the pointer
    if unsafe { libc::ioctl(fd, libc::TCSETS2 as _, &tio2) } < 0 {
        return Err(DeviceError::Termios(Errno::last()));
    }
    Ok(())
}

#[cfg(not(target_os = "linux"))]
fn set_custom_speed(_fd: libc::c_int, rate: u32) -> DeviceResult<()> {
    Err(DeviceError::UnsupportedRate(rate))
}
