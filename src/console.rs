//! Controlling terminal setup
//!
//! The local terminal is switched to raw mode so every key, including
//! ctrl-c and ctrl-t, reaches the session as a byte. The guard puts the
//! original settings back when dropped.

use std::os::fd::{AsRawFd, BorrowedFd};

use nix::libc;
use nix::sys::termios::{self, SetArg, SpecialCharacterIndices, Termios};
use nix::unistd::isatty;

/// RAII guard for raw terminal mode
pub struct RawModeGuard {
    fd: BorrowedFd<'static>,
    original: Termios,
}

impl RawModeGuard {
    /// Put the terminal behind `fd` into raw mode
    ///
    /// Returns `Ok(None)` when `fd` is not a terminal (piped input or
    /// output), in which case nothing is changed.
    pub fn new(fd: BorrowedFd<'static>) -> nix::Result<Option<Self>> {
        if !is_terminal(fd) {
            return Ok(None);
        }

        let original = termios::tcgetattr(fd)?;

        let mut raw = original.clone();
        termios::cfmakeraw(&mut raw);

        // Blocking read until one character is available
        raw.control_chars[SpecialCharacterIndices::VMIN as usize] = 1;
        raw.control_chars[SpecialCharacterIndices::VTIME as usize] = 0;

        termios::tcsetattr(fd, SetArg::TCSANOW, &raw)?;

        Ok(Some(Self { fd, original }))
    }

    /// Raw mode for standard input
    pub fn stdin() -> nix::Result<Option<Self>> {
        Self::new(stdin_fd())
    }

    /// Raw mode for standard output
    pub fn stdout() -> nix::Result<Option<Self>> {
        Self::new(stdout_fd())
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        let _ = termios::tcsetattr(self.fd, SetArg::TCSANOW, &self.original);
    }
}

/// Standard input as a borrowed descriptor
pub fn stdin_fd() -> BorrowedFd<'static> {
    // SAFETY: fd 0 stays open for the lifetime of the process
    unsafe { BorrowedFd::borrow_raw(libc::STDIN_FILENO) }
}

/// Standard output as a borrowed descriptor
pub fn stdout_fd() -> BorrowedFd<'static> {
    // SAFETY: fd 1 stays open for the lifetime of the process
    unsafe { BorrowedFd::borrow_raw(libc::STDOUT_FILENO) }
}

/// Whether `fd` refers to a terminal
pub fn is_terminal(fd: BorrowedFd<'_>) -> bool {
    isatty(fd.as_raw_fd()).unwrap_or(false)
}
