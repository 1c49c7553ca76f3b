//! Pseudo-terminal helpers shared by the integration tests
//!
//! The slave side of a PTY pair stands in for a serial device; the test
//! plays the remote end through the master.

#![allow(dead_code)]

use std::os::fd::{AsRawFd, BorrowedFd, RawFd};
use std::time::{Duration, Instant};

use nix::fcntl::OFlag;
use nix::poll::{poll, PollFd, PollFlags};
use nix::pty::{grantpt, posix_openpt, ptsname_r, unlockpt, PtyMaster};

pub struct PtyPair {
    pub master: PtyMaster,
    pub slave: String,
}

/// Open a PTY pair; the slave is left for `Device::open`
pub fn open_pty() -> PtyPair {
    let master = posix_openpt(OFlag::O_RDWR | OFlag::O_NOCTTY).expect("Failed to open PTY master");
    grantpt(&master).expect("grantpt failed");
    unlockpt(&master).expect("unlockpt failed");
    let slave = ptsname_r(&master).expect("ptsname failed");
    PtyPair { master, slave }
}

/// Wait until `fd` is readable
pub fn wait_readable(fd: RawFd, timeout_ms: i32) -> bool {
    // SAFETY: the caller keeps fd open for the duration of the call
    let borrowed = unsafe { BorrowedFd::borrow_raw(fd) };
    let mut fds = [PollFd::new(&borrowed, PollFlags::POLLIN)];
    matches!(poll(&mut fds, timeout_ms), Ok(n) if n > 0)
}

/// Collect at least `len` bytes from the master, or whatever arrived in time
pub fn read_master(master: &PtyMaster, len: usize, timeout_ms: u64) -> Vec<u8> {
    let mut output = Vec::new();
    let mut buf = [0u8; 4096];
    let deadline = Instant::now() + Duration::from_millis(timeout_ms);

    while output.len() < len && Instant::now() < deadline {
        if wait_readable(master.as_raw_fd(), 50) {
            match nix::unistd::read(master.as_raw_fd(), &mut buf) {
                Ok(0) => break,
                Ok(n) => output.extend_from_slice(&buf[..n]),
                Err(_) => break,
            }
        }
    }

    output
}

/// Send bytes to the device side
pub fn write_master(master: &PtyMaster, data: &[u8]) {
    let mut data = data;
    while !data.is_empty() {
        let n = nix::unistd::write(master.as_raw_fd(), data).expect("Failed to write to master");
        data = &data[n..];
    }
}
