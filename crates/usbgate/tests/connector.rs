//! Connector behavior: session caching, revalidation with reopen, and
//! proxied request/response exchanges.

use std::time::Duration;

use usbgate::testing::{MockDevice, MockHost};
use usbgate::{Connector, Error, Selector, TransportError};

const TIMEOUT: Duration = Duration::from_secs(5);

// Connectors borrow the host here so tests can keep observing mock state.
fn connector(host: &MockHost) -> Connector<&MockHost> {
    Connector::new(host, Selector::new(0x1050, 0x0030), TIMEOUT)
}

#[test]
fn open_is_lazy_and_reuses_the_cached_session() {
    let host = MockHost::new().device(MockDevice::new(0x1050, 0x0030));
    let connector = connector(&host);
    assert_eq!(host.live_handles(), 0);

    connector.open().unwrap();
    assert_eq!(host.live_handles(), 2);

    // A second open reuses the cached session instead of rediscovering.
    connector.open().unwrap();
    assert_eq!(host.live_handles(), 2);

    connector.close();
    assert_eq!(host.live_handles(), 0);

    // Closing with nothing cached is a no-op.
    connector.close();
    assert_eq!(host.live_handles(), 0);
}

#[test]
fn open_propagates_not_found() {
    let host = MockHost::new();
    let connector = connector(&host);
    assert!(matches!(connector.open(), Err(Error::NotFound)));
}

#[test]
fn check_passes_on_a_healthy_session() {
    let host = MockHost::new().device(MockDevice::new(0x1050, 0x0030));
    let connector = connector(&host);
    connector.check().unwrap();
    assert_eq!(host.live_handles(), 2);
}

#[test]
fn check_reopens_once_on_a_stale_session() {
    let host = MockHost::new().device(MockDevice::new(0x1050, 0x0030));
    let connector = connector(&host);
    connector.open().unwrap();

    // The cached session's next identity query fails, as if the device was
    // replugged; the connector must rediscover and pass on the new session.
    host.fail_next_identity(0, 1, TransportError::NoDevice);
    connector.check().unwrap();
    assert_eq!(host.live_handles(), 2);
}

#[test]
fn check_gives_up_after_one_reopen() {
    let host = MockHost::new().device(MockDevice::new(0x1050, 0x0030));
    let connector = connector(&host);
    connector.open().unwrap();

    // Both the cached session's check and the rediscovery's identity query
    // fail; the connector must surface an error instead of looping.
    host.fail_next_identity(0, 8, TransportError::NoDevice);
    assert!(connector.check().is_err());
}

#[test]
fn proxy_writes_the_request_and_returns_the_response() {
    let host = MockHost::new().device(MockDevice::new(0x1050, 0x0030));
    let connector = connector(&host);

    host.queue_response(0, vec![0x5a, 0x01, 0x02]);
    let response = connector.proxy(b"\x03\x00\x00").unwrap();
    assert_eq!(response, vec![0x5a, 0x01, 0x02]);
    assert_eq!(host.writes(0), vec![vec![3, 0, 0]]);
}

#[test]
fn proxy_reopens_and_retries_once_after_a_transfer_failure() {
    let host = MockHost::new().device(MockDevice::new(0x1050, 0x0030));
    let connector = connector(&host);
    connector.open().unwrap();

    host.fail_next_transfers(0, 1, TransportError::NoDevice);
    host.queue_response(0, vec![0x42]);

    let response = connector.proxy(b"req").unwrap();
    assert_eq!(response, vec![0x42]);

    // First write failed, then the retry wrote again after reopening.
    assert_eq!(host.writes(0), vec![b"req".to_vec()]);
    assert_eq!(host.live_handles(), 2);
}

#[test]
fn proxy_surfaces_the_error_after_a_failed_retry() {
    let host = MockHost::new().device(MockDevice::new(0x1050, 0x0030));
    let connector = connector(&host);
    connector.open().unwrap();

    host.fail_next_transfers(0, 2, TransportError::Timeout);
    let err = connector.proxy(b"req").unwrap_err();
    assert!(matches!(err, Error::Transport(TransportError::Timeout)));
}

#[test]
fn proxy_rejects_empty_requests_before_opening_anything() {
    let host = MockHost::new().device(MockDevice::new(0x1050, 0x0030));
    let connector = connector(&host);

    let err = connector.proxy(&[]).unwrap_err();
    assert!(matches!(err, Error::InvalidArgument));
    assert_eq!(host.live_handles(), 0);
}
