//! Session lifecycle and transfer-operation contracts.

use std::time::Duration;

use usbgate::testing::{MockDevice, MockHost};
use usbgate::{Error, Selector, TransportError, find_device};

const TIMEOUT: Duration = Duration::from_secs(5);

fn open_session(host: &MockHost) -> usbgate::Session<MockHost> {
    find_device(host, &Selector::new(0x1050, 0x0030), TIMEOUT).unwrap()
}

#[test]
fn close_releases_both_handles_and_is_idempotent() {
    let host = MockHost::new().device(MockDevice::new(0x1050, 0x0030));
    let mut session = open_session(&host);
    assert_eq!(host.live_handles(), 2);

    session.close();
    assert!(!session.is_open());
    assert_eq!(host.live_handles(), 0);

    // Second close is a no-op.
    session.close();
    assert!(!session.is_open());
    assert_eq!(host.live_handles(), 0);
}

#[test]
fn dropping_an_open_session_releases_its_handles() {
    let host = MockHost::new().device(MockDevice::new(0x1050, 0x0030));
    let session = open_session(&host);
    assert_eq!(host.live_handles(), 2);

    drop(session);
    assert_eq!(host.live_handles(), 0);
}

#[test]
fn transfers_on_a_closed_session_fail_with_invalid_state() {
    let host = MockHost::new().device(MockDevice::new(0x1050, 0x0030));
    let mut session = open_session(&host);
    session.close();

    // Buffer validity is irrelevant once the session is closed.
    assert!(matches!(session.write(b"data"), Err(Error::InvalidState)));
    let mut buf = [0u8; 16];
    assert!(matches!(session.read(&mut buf), Err(Error::InvalidState)));
    assert!(matches!(
        session.check(0x1050, 0x0030),
        Err(Error::InvalidState)
    ));
}

#[test]
fn empty_buffers_fail_without_touching_the_transport() {
    let host = MockHost::new().device(MockDevice::new(0x1050, 0x0030));
    let mut session = open_session(&host);

    assert!(matches!(session.write(&[]), Err(Error::InvalidArgument)));
    assert!(matches!(session.read(&mut []), Err(Error::InvalidArgument)));
    assert_eq!(host.transfer_calls(0), 0);
}

#[test]
fn write_reports_bytes_written() {
    let host = MockHost::new().device(MockDevice::new(0x1050, 0x0030));
    let mut session = open_session(&host);

    let n = session.write(b"\x01\x02\x03\x04").unwrap();
    assert_eq!(n, 4);
    assert_eq!(host.writes(0), vec![vec![1, 2, 3, 4]]);
}

#[test]
fn short_reads_are_reported_as_is() {
    let host = MockHost::new().device(MockDevice::new(0x1050, 0x0030));
    let mut session = open_session(&host);

    host.queue_response(0, vec![0xaa, 0xbb]);
    let mut buf = [0u8; 64];
    let n = session.read(&mut buf).unwrap();
    assert_eq!(n, 2);
    assert_eq!(&buf[..n], &[0xaa, 0xbb]);
}

#[test]
fn transport_errors_pass_through_verbatim() {
    let host = MockHost::new().device(MockDevice::new(0x1050, 0x0030));
    let mut session = open_session(&host);

    host.fail_next_transfers(0, 1, TransportError::Timeout);
    let err = session.write(b"x").unwrap_err();
    assert!(matches!(err, Error::Transport(TransportError::Timeout)));

    // The session stays open; a transfer failure is not a state change.
    assert!(session.is_open());
}

#[test]
fn check_succeeds_on_matching_identity() {
    let host = MockHost::new().device(MockDevice::new(0x1050, 0x0030).serial("0123456789"));
    let session = open_session(&host);

    session.check(0x1050, 0x0030).unwrap();
}

#[test]
fn check_reports_not_found_on_identity_mismatch() {
    let host = MockHost::new().device(MockDevice::new(0x1050, 0x0030));
    let session = open_session(&host);

    let err = session.check(0x1050, 0x0407).unwrap_err();
    assert!(matches!(err, Error::NotFound));
}

#[test]
fn session_debug_reports_the_open_state() {
    // Sessions appear in assertion output (unwrap_err on discovery results),
    // so the Debug form must exist and track the state machine.
    let host = MockHost::new().device(MockDevice::new(0x1050, 0x0030));
    let mut session = open_session(&host);
    assert!(format!("{:?}", session).contains("open: true"));

    session.close();
    assert!(format!("{:?}", session).contains("open: false"));
}

#[test]
fn check_does_not_consult_the_serial_number() {
    // Identity revalidation matches on vendor/product alone, so a device
    // opened via serial still checks out without a string query.
    let host = MockHost::new().device(
        MockDevice::new(0x1050, 0x0030)
            .serial("0123456789")
            .fail_string(TransportError::Io),
    );

    let selector = Selector::with_serial(0x1050, 0x0030, "0123456789");
    let err = find_device(&host, &selector, TIMEOUT).unwrap_err();
    // Discovery itself needed the string and failed...
    assert!(matches!(err, Error::NotFound));

    // ...but a vid/pid-only session never asks for it.
    let session = find_device(&host, &Selector::new(0x1050, 0x0030), TIMEOUT).unwrap();
    session.check(0x1050, 0x0030).unwrap();
}
