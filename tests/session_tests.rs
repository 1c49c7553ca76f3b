//! End-to-end session tests
//!
//! A PTY slave plays the serial device and a socket pair plays the local
//! keyboard, so the whole path from keystroke to wire can be observed.

#![cfg(target_os = "linux")]

mod common;

use std::io::{Read, Write};
use std::os::fd::{AsFd, AsRawFd};
use std::os::unix::net::UnixStream;
use std::path::Path;
use std::thread;
use std::time::{Duration, Instant};

use common::{open_pty, read_master, wait_readable, write_master};
use ttybridge::app::Config;
use ttybridge::command::SENTINEL;
use ttybridge::device::Device;
use ttybridge::session::{
    acquire, connect, wait_for_device, Exit, Flow, Session, SessionError, Waiter,
};
use ttybridge::sink::{Display, PrintMode};

fn new_session(config: Config) -> Session<Vec<u8>> {
    Session::new(config, Display::new(Vec::new(), false), true).expect("Failed to create session")
}

fn open_device(session: &Session<Vec<u8>>, path: &str) -> Device {
    let mut device = Device::open(path).expect("Failed to open device");
    device
        .configure(&session.config().line_config().unwrap())
        .expect("Failed to configure device");
    device
}

fn screen(session: &Session<Vec<u8>>) -> String {
    String::from_utf8_lossy(session.display().get_ref()).into_owned()
}

#[test]
fn test_onlcrnl_expands_newline() {
    let pty = open_pty();
    let mut session = new_session(Config {
        map: "ONLCRNL".to_string(),
        ..Default::default()
    });
    let mut device = open_device(&session, &pty.slave);
    session.on_connect().unwrap();

    let flow = session.process_local_input(b"a\n", Some(&mut device)).unwrap();
    assert_eq!(flow, Flow::Continue);
    device.flush().unwrap();

    assert_eq!(read_master(&pty.master, 3, 1000), b"a\r\n");
    assert_eq!(session.stats().tx_total, 3);
}

#[test]
fn test_odelbs_and_ocrnl() {
    let pty = open_pty();
    let mut session = new_session(Config {
        map: "ODELBS,OCRNL".to_string(),
        ..Default::default()
    });
    let mut device = open_device(&session, &pty.slave);

    session
        .process_local_input(&[0x7f, b'\r'], Some(&mut device))
        .unwrap();
    device.flush().unwrap();

    assert_eq!(read_master(&pty.master, 2, 1000), &[0x08, b'\n']);
}

#[test]
fn test_hex_mode_transmit() {
    let pty = open_pty();
    let mut session = new_session(Config {
        hex_mode: true,
        ..Default::default()
    });
    let mut device = open_device(&session, &pty.slave);
    session.on_connect().unwrap();
    assert_eq!(session.print_mode(), PrintMode::Hex);

    // "4" then "!" sends nothing and leaves the accumulator empty
    session
        .process_local_input(b"4!41ab", Some(&mut device))
        .unwrap();
    device.flush().unwrap();

    assert_eq!(read_master(&pty.master, 2, 1000), &[0x41, 0xab]);
    assert_eq!(session.stats().tx_total, 2);
    assert!(screen(&session).contains("Invalid hex character"));
}

#[test]
fn test_toggle_hex_drops_pending_nibble() {
    let pty = open_pty();
    let mut session = new_session(Config::default());
    let mut device = open_device(&session, &pty.slave);

    // Enter hex mode, type half a byte, leave and re-enter
    let input = [SENTINEL, b'h', b'4', SENTINEL, b'h', SENTINEL, b'h', b'2', b'0'];
    session.process_local_input(&input, Some(&mut device)).unwrap();
    device.flush().unwrap();

    assert_eq!(read_master(&pty.master, 1, 1000), b" ");
    assert_eq!(session.stats().tx_total, 1);
}

#[test]
fn test_literal_sentinel() {
    let pty = open_pty();
    let mut session = new_session(Config::default());
    let mut device = open_device(&session, &pty.slave);

    session
        .process_local_input(&[SENTINEL, b't'], Some(&mut device))
        .unwrap();
    device.flush().unwrap();

    assert_eq!(read_master(&pty.master, 1, 1000), &[SENTINEL]);
    assert_eq!(session.stats().tx_total, 1);
}

#[test]
fn test_unknown_command_forwards_nothing() {
    let pty = open_pty();
    let mut session = new_session(Config::default());
    let mut device = open_device(&session, &pty.slave);

    session
        .process_local_input(&[SENTINEL, b'z', b'k'], Some(&mut device))
        .unwrap();
    device.flush().unwrap();

    assert_eq!(read_master(&pty.master, 1, 1000), b"k");
    assert_eq!(session.stats().tx_total, 1);
}

#[test]
fn test_local_echo() {
    let pty = open_pty();
    let mut session = new_session(Config {
        local_echo: true,
        ..Default::default()
    });
    let mut device = open_device(&session, &pty.slave);
    session.on_connect().unwrap();
    session.display_mut().get_mut().clear();

    session.process_local_input(b"hi", Some(&mut device)).unwrap();
    assert_eq!(screen(&session), "hi");
}

#[test]
fn test_device_loss_keeps_rx_total() {
    let pty = open_pty();
    let mut session = new_session(Config::default());
    let device = open_device(&session, &pty.slave);
    let fd = device.fd().unwrap().as_raw_fd();

    write_master(&pty.master, b"xyz");
    assert!(wait_readable(fd, 1000));
    session.read_device(&device).unwrap();
    assert_eq!(session.stats().rx_total, 3);
    assert!(screen(&session).ends_with("xyz"));

    drop(pty.master);
    match session.read_device(&device) {
        Err(SessionError::Device(e)) => assert!(e.is_loss(), "unexpected error: {e}"),
        other => panic!("expected device loss, got {other:?}"),
    }
    assert_eq!(session.stats().rx_total, 3);
}

#[test]
fn test_connect_forwards_until_quit() {
    let pty = open_pty();
    let mut session = new_session(Config::default());
    let mut device = open_device(&session, &pty.slave);

    let (mut keyboard, input) = UnixStream::pair().unwrap();
    keyboard.write_all(b"hi").unwrap();
    keyboard.write_all(&[SENTINEL, b'q']).unwrap();

    let exit = connect(&mut session, &mut device, input.as_fd()).unwrap();
    assert_eq!(exit, Exit::Quit);
    assert!(device.is_connected());
    assert!(screen(&session).contains("Connected"));

    assert_eq!(read_master(&pty.master, 2, 1000), b"hi");
    assert_eq!(session.stats().tx_total, 2);
}

#[test]
fn test_connect_displays_device_output() {
    let pty = open_pty();
    let mut session = new_session(Config::default());
    let mut device = open_device(&session, &pty.slave);

    write_master(&pty.master, b"ping\r\n");
    assert!(wait_readable(device.fd().unwrap().as_raw_fd(), 1000));

    let (mut keyboard, input) = UnixStream::pair().unwrap();
    keyboard.write_all(&[SENTINEL, b'q']).unwrap();

    let exit = connect(&mut session, &mut device, input.as_fd()).unwrap();
    assert_eq!(exit, Exit::Quit);
    assert!(screen(&session).contains("ping\r\n"));
    assert_eq!(session.stats().rx_total, 6);
}

#[test]
fn test_connect_ends_on_input_eof() {
    let pty = open_pty();
    let mut session = new_session(Config::default());
    let mut device = open_device(&session, &pty.slave);

    let (keyboard, input) = UnixStream::pair().unwrap();
    drop(keyboard);

    let exit = connect(&mut session, &mut device, input.as_fd()).unwrap();
    assert_eq!(exit, Exit::InputClosed);
}

#[test]
fn test_connect_reports_device_loss() {
    let pty = open_pty();
    let mut session = new_session(Config::default());
    let mut device = open_device(&session, &pty.slave);

    let (_keyboard, input) = UnixStream::pair().unwrap();
    drop(pty.master);

    let exit = connect(&mut session, &mut device, input.as_fd()).unwrap();
    assert_eq!(exit, Exit::DeviceLost);
    assert!(!device.is_connected());
    assert!(screen(&session).contains("Disconnected"));
}

#[test]
fn test_wait_returns_when_device_present() {
    let pty = open_pty();
    let mut session = new_session(Config::default());
    let mut waiter = Waiter::default();
    let (_keyboard, input) = UnixStream::pair().unwrap();

    let result = wait_for_device(&mut session, &mut waiter, Path::new(&pty.slave), input.as_fd());
    assert_eq!(result.unwrap(), None);
    assert!(screen(&session).contains("Waiting for tty device.."));
}

#[test]
fn test_quit_while_waiting() {
    let mut session = new_session(Config::default());
    let mut waiter = Waiter::default();
    let (mut keyboard, input) = UnixStream::pair().unwrap();
    keyboard.write_all(&[SENTINEL, b'q']).unwrap();

    let result = wait_for_device(
        &mut session,
        &mut waiter,
        Path::new("/dev/ttybridge-does-not-exist"),
        input.as_fd(),
    );
    assert_eq!(result.unwrap(), Some(Exit::Quit));
}

#[test]
fn test_log_records_received_bytes() {
    let dir = tempfile::tempdir().unwrap();
    let log_path = dir.path().join("rx.log");

    let pty = open_pty();
    let mut session = new_session(Config {
        log: true,
        log_file: Some(log_path.clone()),
        ..Default::default()
    });
    let mut device = open_device(&session, &pty.slave);

    write_master(&pty.master, b"log me\n");
    assert!(wait_readable(device.fd().unwrap().as_raw_fd(), 1000));

    let (mut keyboard, input) = UnixStream::pair().unwrap();
    keyboard.write_all(&[SENTINEL, b'q']).unwrap();
    connect(&mut session, &mut device, input.as_fd()).unwrap();

    assert_eq!(std::fs::read(&log_path).unwrap(), b"log me\n");
}

#[test]
fn test_hex_mode_rejects_line_endings_before_mapping() {
    let pty = open_pty();
    let mut session = new_session(Config {
        hex_mode: true,
        map: "ONLCRNL,OCRNL".to_string(),
        ..Default::default()
    });
    let mut device = open_device(&session, &pty.slave);
    session.on_connect().unwrap();

    session
        .process_local_input(b"\n\r41", Some(&mut device))
        .unwrap();
    device.flush().unwrap();

    // Only the decoded byte reaches the line, unmapped
    assert_eq!(read_master(&pty.master, 3, 500), &[0x41]);
    assert_eq!(session.stats().tx_total, 1);
    assert_eq!(screen(&session).matches("Invalid hex character").count(), 2);
}

#[test]
fn test_hex_mode_decoded_newline_is_not_expanded() {
    let pty = open_pty();
    let mut session = new_session(Config {
        hex_mode: true,
        map: "ONLCRNL".to_string(),
        ..Default::default()
    });
    let mut device = open_device(&session, &pty.slave);
    session.on_connect().unwrap();

    session.process_local_input(b"0a", Some(&mut device)).unwrap();
    device.flush().unwrap();

    assert_eq!(read_master(&pty.master, 2, 500), b"\n");
    assert_eq!(session.stats().tx_total, 1);
}

#[test]
fn test_paced_crlf_counts_each_byte() {
    let pty = open_pty();
    let mut session = new_session(Config {
        map: "ONLCRNL".to_string(),
        ..Default::default()
    });
    let mut device = open_device(&session, &pty.slave);
    device.set_output_delay(Some(Duration::from_millis(1)));

    session.process_local_input(b"\n", Some(&mut device)).unwrap();
    assert_eq!(read_master(&pty.master, 2, 1000), b"\r\n");
    assert_eq!(session.stats().tx_total, 2);

    // A write that fails outright adds nothing
    drop(pty.master);
    assert!(session.process_local_input(b"\n", Some(&mut device)).is_err());
    assert_eq!(session.stats().tx_total, 2);
}

#[test]
fn test_wait_detects_device_under_steady_input() {
    let pty = open_pty();
    let mut session = new_session(Config::default());
    let mut waiter = Waiter::default();
    let (mut keyboard, input) = UnixStream::pair().unwrap();
    let path = Path::new(&pty.slave);

    // Use up the immediate first check so later waits poll for a full second
    assert_eq!(wait_for_device(&mut session, &mut waiter, path, input.as_fd()).unwrap(), None);

    let typist = thread::spawn(move || {
        for _ in 0..30 {
            if keyboard.write_all(b"x").is_err() {
                break;
            }
            thread::sleep(Duration::from_millis(100));
        }
    });

    thread::sleep(Duration::from_millis(150));
    let start = Instant::now();
    let result = wait_for_device(&mut session, &mut waiter, path, input.as_fd()).unwrap();
    let elapsed = start.elapsed();
    drop(input);
    typist.join().unwrap();

    assert_eq!(result, None);
    assert!(elapsed < Duration::from_millis(1500), "took {elapsed:?}");
}

#[test]
fn test_repeated_acquire_failure_reported_once() {
    let pty = open_pty();
    let _holder = Device::open(&pty.slave).expect("Failed to open device");

    let mut session = new_session(Config {
        device: pty.slave.clone(),
        ..Default::default()
    });
    let line = session.config().line_config().unwrap();
    let mut waiter = Waiter::default();
    let (_keyboard, input) = UnixStream::pair().unwrap();
    let path = Path::new(&pty.slave);

    for _ in 0..3 {
        let waited = wait_for_device(&mut session, &mut waiter, path, input.as_fd()).unwrap();
        assert_eq!(waited, None);
        assert!(acquire(&mut session, &mut waiter, &line).unwrap().is_none());
    }

    let out = screen(&session);
    assert_eq!(out.matches("Waiting for tty device..").count(), 1);
    assert_eq!(out.matches("locked by another process").count(), 1);
}

#[test]
fn test_acquire_after_release_announces_next_outage() {
    let pty = open_pty();
    let holder = Device::open(&pty.slave).expect("Failed to open device");

    let mut session = new_session(Config {
        device: pty.slave.clone(),
        ..Default::default()
    });
    let line = session.config().line_config().unwrap();
    let mut waiter = Waiter::default();
    let (_keyboard, input) = UnixStream::pair().unwrap();
    let path = Path::new(&pty.slave);

    wait_for_device(&mut session, &mut waiter, path, input.as_fd()).unwrap();
    assert!(acquire(&mut session, &mut waiter, &line).unwrap().is_none());

    drop(holder);
    let device = acquire(&mut session, &mut waiter, &line).unwrap();
    assert!(device.is_some());
    drop(device);

    // A new outage starts with a fresh waiting message
    wait_for_device(&mut session, &mut waiter, path, input.as_fd()).unwrap();
    assert_eq!(screen(&session).matches("Waiting for tty device..").count(), 2);
}

#[test]
fn test_socket_client_bridged_through_connect() {
    let dir = tempfile::tempdir().unwrap();
    let socket_path = dir.path().join("bridge.sock");

    let pty = open_pty();
    let mut session = new_session(Config {
        map: "ONLCRNL".to_string(),
        socket: Some(format!("unix:{}", socket_path.display())),
        ..Default::default()
    });
    let mut device = open_device(&session, &pty.slave);

    let mut client = UnixStream::connect(&socket_path).unwrap();
    client.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
    client.write_all(b"\n").unwrap();

    // The remote end answers and the operator quits once the client is in
    let (mut keyboard, input) = UnixStream::pair().unwrap();
    let master_fd = pty.master.as_raw_fd();
    let remote = thread::spawn(move || {
        thread::sleep(Duration::from_millis(300));
        nix::unistd::write(master_fd, b"ok").unwrap();
        thread::sleep(Duration::from_millis(300));
        keyboard.write_all(&[SENTINEL, b'q']).unwrap();
    });

    let exit = connect(&mut session, &mut device, input.as_fd()).unwrap();
    remote.join().unwrap();
    assert_eq!(exit, Exit::Quit);

    assert_eq!(read_master(&pty.master, 2, 1000), b"\r\n");
    assert_eq!(session.stats().tx_total, 2);
    assert_eq!(session.stats().rx_total, 2);

    let mut mirrored = [0u8; 2];
    client.read_exact(&mut mirrored).unwrap();
    assert_eq!(&mirrored, b"ok");
}
