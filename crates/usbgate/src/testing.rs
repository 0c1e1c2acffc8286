//! Scriptable in-memory [`UsbHost`] for tests.
//!
//! [`MockHost`] emulates the OS side of discovery, including the two-phase
//! size-then-fill path query, and lets tests inject failures at every stage
//! a real scan can fail at. Live handles are counted so tests can assert
//! that no candidate leaks.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use usbgate::testing::{MockDevice, MockHost};
//! use usbgate::{Selector, find_device};
//!
//! let host = MockHost::new()
//!     .device(MockDevice::new(0x1050, 0x0030).serial("0123456789"));
//! let session = find_device(&host, &Selector::new(0x1050, 0x0030),
//!     Duration::from_secs(1)).unwrap();
//! assert!(session.is_open());
//! ```

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::backend::{QueryStatus, UsbHost, UsbInterface, resolve_sized_query};
use crate::error::{Error, Result, TransportError};
use crate::types::{DeviceIdentity, DevicePath, PIPE_WRITE, PipeId};

/// Build the raw bytes of a UTF-16LE string descriptor for `s`.
pub fn string_descriptor_bytes(s: &str) -> Vec<u8> {
    let units: Vec<u16> = s.encode_utf16().collect();
    let mut raw = Vec::with_capacity(2 + units.len() * 2);
    raw.push((2 + units.len() * 2) as u8);
    raw.push(0x03);
    for unit in units {
        raw.extend_from_slice(&unit.to_le_bytes());
    }
    raw
}

/// Blueprint for one simulated device, with failure injection per stage.
#[derive(Debug, Clone, Default)]
pub struct MockDevice {
    vendor_id: u16,
    product_id: u16,
    serial: Option<String>,
    empty_serial: bool,
    fail_open: Option<TransportError>,
    fail_claim: Option<TransportError>,
    fail_descriptor: Option<TransportError>,
    fail_string: Option<TransportError>,
    fail_policy: Option<TransportError>,
}

impl MockDevice {
    pub fn new(vendor_id: u16, product_id: u16) -> Self {
        Self {
            vendor_id,
            product_id,
            ..Self::default()
        }
    }

    /// Give the device a serial number descriptor.
    pub fn serial(mut self, serial: impl Into<String>) -> Self {
        self.serial = Some(serial.into());
        self
    }

    /// Advertise a serial descriptor index whose string is empty
    /// (a malformed device).
    pub fn empty_serial(mut self) -> Self {
        self.empty_serial = true;
        self
    }

    /// Fail the raw open with `err`.
    pub fn fail_open(mut self, err: TransportError) -> Self {
        self.fail_open = Some(err);
        self
    }

    /// Fail transport init with `err`.
    pub fn fail_claim(mut self, err: TransportError) -> Self {
        self.fail_claim = Some(err);
        self
    }

    /// Fail the device descriptor query with `err`.
    pub fn fail_descriptor(mut self, err: TransportError) -> Self {
        self.fail_descriptor = Some(err);
        self
    }

    /// Fail the serial string descriptor query with `err`.
    pub fn fail_string(mut self, err: TransportError) -> Self {
        self.fail_string = Some(err);
        self
    }

    /// Fail pipe policy configuration with `err`.
    pub fn fail_policy(mut self, err: TransportError) -> Self {
        self.fail_policy = Some(err);
        self
    }
}

/// Shared per-device runtime state, observable from tests.
struct DeviceState {
    spec: MockDevice,
    zlp_enabled: AtomicBool,
    timeouts: Mutex<Vec<(PipeId, Duration)>>,
    writes: Mutex<Vec<Vec<u8>>>,
    responses: Mutex<VecDeque<Vec<u8>>>,
    transfer_calls: AtomicUsize,
    fail_next_transfers: Mutex<VecDeque<TransportError>>,
    fail_next_identity: Mutex<VecDeque<TransportError>>,
}

impl DeviceState {
    fn new(spec: MockDevice) -> Self {
        Self {
            spec,
            zlp_enabled: AtomicBool::new(false),
            timeouts: Mutex::new(Vec::new()),
            writes: Mutex::new(Vec::new()),
            responses: Mutex::new(VecDeque::new()),
            transfer_calls: AtomicUsize::new(0),
            fail_next_transfers: Mutex::new(VecDeque::new()),
            fail_next_identity: Mutex::new(VecDeque::new()),
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// In-memory enumeration of [`MockDevice`]s.
pub struct MockHost {
    devices: Vec<Arc<DeviceState>>,
    live_handles: Arc<AtomicUsize>,
    abort_at: Option<(usize, TransportError)>,
    sizing_succeeds_at: Option<usize>,
}

impl MockHost {
    pub fn new() -> Self {
        Self {
            devices: Vec::new(),
            live_handles: Arc::new(AtomicUsize::new(0)),
            abort_at: None,
            sizing_succeeds_at: None,
        }
    }

    /// Append a device to the enumeration order.
    pub fn device(mut self, spec: MockDevice) -> Self {
        self.devices.push(Arc::new(DeviceState::new(spec)));
        self
    }

    /// Make path resolution at `index` fail with `err`, aborting any scan
    /// that reaches it.
    pub fn abort_enumeration_at(mut self, index: usize, err: TransportError) -> Self {
        self.abort_at = Some((index, err));
        self
    }

    /// Make the sizing call at `index` report success, violating the
    /// size-then-fill protocol.
    pub fn sizing_success_at(mut self, index: usize) -> Self {
        self.sizing_succeeds_at = Some(index);
        self
    }

    /// Number of currently live handles (raw handles plus claimed
    /// interfaces).
    pub fn live_handles(&self) -> usize {
        self.live_handles.load(Ordering::SeqCst)
    }

    /// Whether zero-length-packet termination was enabled on the write pipe
    /// of device `index`.
    pub fn zlp_enabled(&self, index: usize) -> bool {
        self.devices[index].zlp_enabled.load(Ordering::SeqCst)
    }

    /// Pipe timeouts applied to device `index`, in application order.
    pub fn timeouts(&self, index: usize) -> Vec<(PipeId, Duration)> {
        lock(&self.devices[index].timeouts).clone()
    }

    /// Buffers written to device `index`, in order.
    pub fn writes(&self, index: usize) -> Vec<Vec<u8>> {
        lock(&self.devices[index].writes).clone()
    }

    /// Queue a buffer to be returned by the next read on device `index`.
    pub fn queue_response(&self, index: usize, response: impl Into<Vec<u8>>) {
        lock(&self.devices[index].responses).push_back(response.into());
    }

    /// Number of read/write transfer calls that reached device `index`.
    pub fn transfer_calls(&self, index: usize) -> usize {
        self.devices[index].transfer_calls.load(Ordering::SeqCst)
    }

    /// Make the next `count` transfers on device `index` fail with `err`.
    pub fn fail_next_transfers(&self, index: usize, count: usize, err: TransportError) {
        let mut queue = lock(&self.devices[index].fail_next_transfers);
        for _ in 0..count {
            queue.push_back(err.clone());
        }
    }

    /// Make the next `count` device descriptor queries on device `index`
    /// fail with `err`.
    pub fn fail_next_identity(&self, index: usize, count: usize, err: TransportError) {
        let mut queue = lock(&self.devices[index].fail_next_identity);
        for _ in 0..count {
            queue.push_back(err.clone());
        }
    }
}

impl Default for MockHost {
    fn default() -> Self {
        Self::new()
    }
}

impl UsbHost for MockHost {
    type Handle = MockHandle;
    type Iface = MockInterface;

    fn device_path(&self, index: usize) -> Result<Option<DevicePath>> {
        let fail = self
            .abort_at
            .as_ref()
            .filter(|(at, _)| *at == index)
            .map(|(_, err)| err.clone());
        let payload = (index < self.devices.len()).then(|| format!("mock:{index}").into_bytes());
        let sizing_violation = self.sizing_succeeds_at == Some(index);

        // Emulate an OS whose path query is size-then-fill.
        let raw = resolve_sized_query(|buf| {
            if let Some(err) = &fail {
                return QueryStatus::Failed(err.clone());
            }
            let Some(payload) = &payload else {
                return QueryStatus::NoMoreItems;
            };
            match buf {
                None if sizing_violation => QueryStatus::Filled(payload.len()),
                None => QueryStatus::InsufficientBuffer(payload.len()),
                Some(out) => {
                    out[..payload.len()].copy_from_slice(payload);
                    QueryStatus::Filled(payload.len())
                }
            }
        })?;

        Ok(raw.map(|bytes| DevicePath::new(String::from_utf8_lossy(&bytes).into_owned())))
    }

    fn open_path(&self, path: &DevicePath) -> Result<Self::Handle> {
        let index: usize = path
            .as_str()
            .strip_prefix("mock:")
            .and_then(|s| s.parse().ok())
            .ok_or(Error::InvalidArgument)?;
        let state = self
            .devices
            .get(index)
            .cloned()
            .ok_or(Error::Transport(TransportError::NoDevice))?;
        if let Some(err) = &state.spec.fail_open {
            return Err(Error::Transport(err.clone()));
        }
        Ok(MockHandle::new(state, self.live_handles.clone()))
    }

    fn claim_interface(&self, handle: &Self::Handle) -> Result<Self::Iface> {
        if let Some(err) = &handle.state.spec.fail_claim {
            return Err(Error::Transport(err.clone()));
        }
        Ok(MockInterface::new(
            handle.state.clone(),
            self.live_handles.clone(),
        ))
    }
}

/// Raw handle on a mock device; counts itself while alive.
pub struct MockHandle {
    state: Arc<DeviceState>,
    live: Arc<AtomicUsize>,
}

impl MockHandle {
    fn new(state: Arc<DeviceState>, live: Arc<AtomicUsize>) -> Self {
        live.fetch_add(1, Ordering::SeqCst);
        Self { state, live }
    }
}

impl Drop for MockHandle {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Claimed interface on a mock device; counts itself while alive.
pub struct MockInterface {
    state: Arc<DeviceState>,
    live: Arc<AtomicUsize>,
}

impl MockInterface {
    fn new(state: Arc<DeviceState>, live: Arc<AtomicUsize>) -> Self {
        live.fetch_add(1, Ordering::SeqCst);
        Self { state, live }
    }

    fn check_transfer(&self) -> Result<()> {
        self.state.transfer_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = lock(&self.state.fail_next_transfers).pop_front() {
            return Err(Error::Transport(err));
        }
        Ok(())
    }
}

impl Drop for MockInterface {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::SeqCst);
    }
}

impl UsbInterface for MockInterface {
    fn device_identity(&self) -> Result<DeviceIdentity> {
        let spec = &self.state.spec;
        if let Some(err) = lock(&self.state.fail_next_identity).pop_front() {
            return Err(Error::Transport(err));
        }
        if let Some(err) = &spec.fail_descriptor {
            return Err(Error::Transport(err.clone()));
        }
        let has_serial = spec.serial.is_some() || spec.empty_serial;
        Ok(DeviceIdentity {
            vendor_id: spec.vendor_id,
            product_id: spec.product_id,
            serial_index: has_serial.then_some(3),
        })
    }

    fn string_descriptor(&self, _index: u8) -> Result<Vec<u8>> {
        let spec = &self.state.spec;
        if let Some(err) = &spec.fail_string {
            return Err(Error::Transport(err.clone()));
        }
        if spec.empty_serial {
            return Ok(string_descriptor_bytes(""));
        }
        match &spec.serial {
            Some(serial) => Ok(string_descriptor_bytes(serial)),
            None => Err(Error::Transport(TransportError::NotFound)),
        }
    }

    fn set_pipe_timeout(&mut self, pipe: PipeId, timeout: Duration) -> Result<()> {
        if let Some(err) = &self.state.spec.fail_policy {
            return Err(Error::Transport(err.clone()));
        }
        lock(&self.state.timeouts).push((pipe, timeout));
        Ok(())
    }

    fn set_short_packet_terminate(&mut self, pipe: PipeId) -> Result<()> {
        if let Some(err) = &self.state.spec.fail_policy {
            return Err(Error::Transport(err.clone()));
        }
        if pipe == PIPE_WRITE {
            self.state.zlp_enabled.store(true, Ordering::SeqCst);
        }
        Ok(())
    }

    fn write_pipe(&mut self, _pipe: PipeId, buf: &[u8]) -> Result<usize> {
        self.check_transfer()?;
        lock(&self.state.writes).push(buf.to_vec());
        Ok(buf.len())
    }

    fn read_pipe(&mut self, _pipe: PipeId, buf: &mut [u8]) -> Result<usize> {
        self.check_transfer()?;
        let Some(response) = lock(&self.state.responses).pop_front() else {
            return Err(Error::Transport(TransportError::Timeout));
        };
        let n = response.len().min(buf.len());
        buf[..n].copy_from_slice(&response[..n]);
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_string_descriptor_bytes_layout() {
        let raw = string_descriptor_bytes("AB");
        assert_eq!(raw, vec![0x06, 0x03, b'A', 0x00, b'B', 0x00]);

        let empty = string_descriptor_bytes("");
        assert_eq!(empty, vec![0x02, 0x03]);
    }

    #[test]
    fn test_handle_accounting() {
        let host = MockHost::new().device(MockDevice::new(0x1234, 0x5678));
        assert_eq!(host.live_handles(), 0);

        let path = host.device_path(0).unwrap().unwrap();
        let handle = host.open_path(&path).unwrap();
        assert_eq!(host.live_handles(), 1);

        let iface = host.claim_interface(&handle).unwrap();
        assert_eq!(host.live_handles(), 2);

        drop(iface);
        drop(handle);
        assert_eq!(host.live_handles(), 0);
    }

    #[test]
    fn test_enumeration_terminates() {
        let host = MockHost::new().device(MockDevice::new(0x1234, 0x5678));
        assert!(host.device_path(0).unwrap().is_some());
        assert!(host.device_path(1).unwrap().is_none());
    }
}
