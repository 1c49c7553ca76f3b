//! Event loop and reconnect driver
//!
//! One thread, one blocking `poll` per iteration. While connected the loop
//! waits without a timeout on the device, the local input and the socket
//! mirror. Between connections it checks the device path once a second.

use std::io::{self, Write};
use std::os::fd::{AsRawFd, BorrowedFd};
use std::path::{Path, PathBuf};

use nix::errno::Errno;
use nix::poll::{poll, PollFd, PollFlags};
use nix::unistd::{access, read, AccessFlags};

use super::{Flow, Session, SessionError};
use crate::app::Config;
use crate::console::{self, RawModeGuard};
use crate::device::{Device, LineConfig, CHUNK_SIZE};
use crate::sink::Display;

/// Interval between device path checks while waiting
const CHECK_INTERVAL_MS: i32 = 1000;

/// Why a connection ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exit {
    /// The operator asked to quit
    Quit,
    /// The device went away
    DeviceLost,
    /// Local input reached end of file
    InputClosed,
}

/// Wait state carried across reconnects
#[derive(Debug)]
pub struct Waiter {
    /// The next check is the first one of the process
    first: bool,
    /// The waiting message was shown for the current outage
    announced: bool,
    /// Last path check error, warned about once
    last_errno: Option<Errno>,
    /// Last failure to open an existing path, warned about once
    last_failure: Option<String>,
}

impl Default for Waiter {
    fn default() -> Self {
        Self {
            first: true,
            announced: false,
            last_errno: None,
            last_failure: None,
        }
    }
}

impl Waiter {
    fn timeout(&mut self) -> i32 {
        if std::mem::take(&mut self.first) {
            0
        } else {
            CHECK_INTERVAL_MS
        }
    }

    /// Record an open failure; true when it differs from the last one
    fn failure_changed(&mut self, text: &str) -> bool {
        if self.last_failure.as_deref() == Some(text) {
            return false;
        }
        self.last_failure = Some(text.to_string());
        true
    }

    /// Forget the outage once a device was acquired
    fn connected(&mut self) {
        self.announced = false;
        self.last_errno = None;
        self.last_failure = None;
    }
}

fn is_ready(fd: &PollFd<'_>) -> bool {
    fd.revents().is_some_and(|r| {
        r.intersects(PollFlags::POLLIN | PollFlags::POLLHUP | PollFlags::POLLERR)
    })
}

/// Poll, retrying when interrupted by a signal
fn wait_ready(fds: &mut [PollFd<'_>], timeout_ms: i32) -> Result<usize, SessionError> {
    loop {
        match poll(fds, timeout_ms) {
            Ok(n) => return Ok(n as usize),
            Err(Errno::EINTR) => continue,
            Err(e) => return Err(SessionError::Poll(e)),
        }
    }
}

/// Read a chunk of local input; `None` when nothing was available
fn read_input(input: BorrowedFd<'_>, buf: &mut [u8]) -> io::Result<Option<usize>> {
    match read(input.as_raw_fd(), buf) {
        Ok(n) => Ok(Some(n)),
        Err(Errno::EINTR | Errno::EAGAIN) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Turn a device loss into an `Exit`, pass other errors on
fn check_loss(result: Result<Flow, SessionError>) -> Result<Option<Exit>, SessionError> {
    match result {
        Ok(Flow::Continue) => Ok(None),
        Ok(Flow::Quit) => Ok(Some(Exit::Quit)),
        Err(SessionError::Device(e)) if e.is_loss() => {
            tracing::debug!("Device lost: {}", e);
            Ok(Some(Exit::DeviceLost))
        },
        Err(e) => Err(e),
    }
}

/// Bridge `input` and `device` until quit, device loss or end of input
///
/// On device loss the device is closed, which restores its settings and
/// releases the lock. Otherwise the device is flushed and left open.
pub fn connect<W: Write>(
    session: &mut Session<W>,
    device: &mut Device,
    input: BorrowedFd<'_>,
) -> Result<Exit, SessionError> {
    session.on_connect()?;
    let mut buf = vec![0u8; CHUNK_SIZE];

    let exit = loop {
        let ready = {
            let device_fd = device.fd()?;
            let socket_fds = session.socket_fds();
            let mut fds = Vec::with_capacity(2 + socket_fds.len());
            fds.push(PollFd::new(&device_fd, PollFlags::POLLIN));
            fds.push(PollFd::new(&input, PollFlags::POLLIN));
            fds.extend(socket_fds.iter().map(|fd| PollFd::new(fd, PollFlags::POLLIN)));

            wait_ready(&mut fds, -1)?;
            fds.iter().map(is_ready).collect::<Vec<_>>()
        };

        if ready[0] {
            let result = session.read_device(device).map(|()| Flow::Continue);
            if let Some(exit) = check_loss(result)? {
                break exit;
            }
        }

        if ready[1] {
            match read_input(input, &mut buf)? {
                Some(0) => break Exit::InputClosed,
                Some(n) => {
                    let result = session.process_local_input(&buf[..n], Some(&mut *device));
                    if let Some(exit) = check_loss(result)? {
                        break exit;
                    }
                },
                None => {},
            }
        }

        if ready[2..].iter().any(|&r| r) {
            if let Some(byte) = session.service_socket(&ready[2..]) {
                let result = session.forward(byte, device).map(|()| Flow::Continue);
                if let Some(exit) = check_loss(result)? {
                    break exit;
                }
            }
        }

        let flushed = device.flush().map(|()| Flow::Continue).map_err(SessionError::from);
        if let Some(exit) = check_loss(flushed)? {
            break exit;
        }
        session.flush_sinks()?;
    };

    match exit {
        Exit::DeviceLost => {
            device.close();
            session.on_disconnect()?;
        },
        Exit::Quit | Exit::InputClosed => {
            if let Err(e) = device.flush() {
                tracing::debug!("Final flush failed: {}", e);
            }
        },
    }
    session.flush_sinks()?;
    Ok(exit)
}

/// Wait until `path` can be opened
///
/// Local input is still interpreted, so the operator can quit or inspect
/// state while waiting. Socket clients are serviced and their input is
/// discarded. Returns `None` once the device is readable, or the reason the
/// wait was abandoned.
pub fn wait_for_device<W: Write>(
    session: &mut Session<W>,
    waiter: &mut Waiter,
    path: &Path,
    input: BorrowedFd<'_>,
) -> Result<Option<Exit>, SessionError> {
    if !waiter.announced {
        session.display_mut().message("Waiting for tty device..")?;
        waiter.announced = true;
    }
    let mut buf = vec![0u8; CHUNK_SIZE];

    loop {
        let timeout = waiter.timeout();
        let ready = {
            let socket_fds = session.socket_fds();
            let mut fds = Vec::with_capacity(1 + socket_fds.len());
            fds.push(PollFd::new(&input, PollFlags::POLLIN));
            fds.extend(socket_fds.iter().map(|fd| PollFd::new(fd, PollFlags::POLLIN)));

            wait_ready(&mut fds, timeout)?;
            fds.iter().map(is_ready).collect::<Vec<_>>()
        };

        if ready[0] {
            match read_input(input, &mut buf)? {
                Some(0) => return Ok(Some(Exit::InputClosed)),
                Some(n) => {
                    if session.process_local_input(&buf[..n], None)? == Flow::Quit {
                        return Ok(Some(Exit::Quit));
                    }
                },
                None => {},
            }
        }

        if ready[1..].iter().any(|&r| r) {
            if let Some(byte) = session.service_socket(&ready[1..]) {
                tracing::debug!("Discarding socket input 0x{:02x} while disconnected", byte);
            }
        }
        session.flush_sinks()?;

        // Checked on every wake-up, not only on timeout
        match access(path, AccessFlags::R_OK) {
            Ok(()) => {
                waiter.last_errno = None;
                return Ok(None);
            },
            Err(errno) => {
                if waiter.last_errno != Some(errno) {
                    session
                        .display_mut()
                        .warning(&format!("Could not open tty device ({})", errno.desc()))?;
                    waiter.last_errno = Some(errno);
                }
            },
        }
    }
}

/// Open, lock and configure the device
fn open_device(config: &Config, line: &LineConfig) -> Result<Device, SessionError> {
    let mut device = Device::open(&config.device)?;
    device.configure(line)?;
    device.set_output_delay(config.output_delay());
    Ok(device)
}

/// Try to acquire the device after a successful wait
///
/// A failure to open, lock or configure it is shown once until it changes
/// and yields `None`, so the caller goes back to waiting.
pub fn acquire<W: Write>(
    session: &mut Session<W>,
    waiter: &mut Waiter,
    line: &LineConfig,
) -> Result<Option<Device>, SessionError> {
    match open_device(session.config(), line) {
        Ok(device) => {
            waiter.connected();
            Ok(Some(device))
        },
        Err(e) => {
            let text = e.to_string();
            if waiter.failure_changed(&text) {
                session.display_mut().warning(&text)?;
            }
            tracing::debug!("Acquiring {} failed: {}", session.config().device, text);
            Ok(None)
        },
    }
}

/// Run the bridge on the process terminal until the operator quits
///
/// Standard input and output are put into raw mode for the duration. With
/// `no_autoconnect` a single connection is attempted and its failure or
/// loss is an error; otherwise the device is waited for and reconnected
/// whenever it disappears.
pub fn run(config: Config) -> Result<(), SessionError> {
    let line = config.line_config()?;
    let input = console::stdin_fd();
    let interactive = console::is_terminal(input);

    let _stdin_guard = RawModeGuard::stdin().map_err(SessionError::Console)?;
    let _stdout_guard = RawModeGuard::stdout().map_err(SessionError::Console)?;

    let display = Display::new(io::stdout(), config.color);
    let mut session = Session::new(config, display, interactive)?;

    session
        .display_mut()
        .message(&format!("ttybridge v{}", env!("CARGO_PKG_VERSION")))?;
    if interactive {
        session.display_mut().message("Press ctrl-t q to quit")?;
    }

    let autoconnect = !session.config().no_autoconnect;
    let path = PathBuf::from(&session.config().device);
    let mut waiter = Waiter::default();

    loop {
        if autoconnect {
            if let Some(exit) = wait_for_device(&mut session, &mut waiter, &path, input)? {
                tracing::debug!("Stopped waiting: {:?}", exit);
                return Ok(());
            }
        }

        let mut device = if autoconnect {
            match acquire(&mut session, &mut waiter, &line)? {
                Some(device) => device,
                None => continue,
            }
        } else {
            open_device(session.config(), &line)?
        };
        tracing::info!("Connected to {}", device.path().display());

        match connect(&mut session, &mut device, input)? {
            Exit::Quit | Exit::InputClosed => return Ok(()),
            Exit::DeviceLost if autoconnect => {},
            Exit::DeviceLost => return Err(SessionError::Disconnected),
        }
    }
}
