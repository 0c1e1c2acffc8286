//! Production [`UsbHost`] implementation on top of libusb via `rusb`.
//!
//! Enumeration order is the libusb device-list order. The raw handle and
//! the claimed interface share one underlying `DeviceHandle`; libusb has no
//! per-pipe timeout or zero-length-packet policy, so the timeouts are
//! carried on the interface wrapper and packet-boundary writes are
//! terminated by an explicit empty bulk write.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use rusb::{Context, DeviceHandle, UsbContext};
use tracing::debug;

use crate::backend::{UsbHost, UsbInterface};
use crate::error::{Error, Result, TransportError};
use crate::types::{DeviceIdentity, DevicePath, PIPE_WRITE, PipeId};

/// GET_DESCRIPTOR request fields for string descriptors.
const REQUEST_GET_DESCRIPTOR: u8 = 0x06;
const DESCRIPTOR_TYPE_STRING: u16 = 0x03;
/// English (US); the language the identity strings are requested in.
const LANGUAGE_ID_EN_US: u16 = 0x0409;
/// Maximum size of a string descriptor (its length field is one byte).
const MAX_STRING_DESCRIPTOR_LEN: usize = 255;
/// Timeout for descriptor round-trips, independent of the session timeout.
const DESCRIPTOR_TIMEOUT: Duration = Duration::from_secs(5);
/// Bulk packet size assumed when the endpoint descriptor is unavailable.
const FALLBACK_PACKET_SIZE: usize = 64;

/// Map a rusb error onto the transport-error vocabulary.
pub(crate) fn map_rusb_error(err: rusb::Error) -> TransportError {
    match err {
        rusb::Error::Timeout => TransportError::Timeout,
        rusb::Error::Pipe => TransportError::Pipe,
        rusb::Error::NoDevice => TransportError::NoDevice,
        rusb::Error::NotFound => TransportError::NotFound,
        rusb::Error::Busy => TransportError::Busy,
        rusb::Error::Overflow => TransportError::Overflow,
        rusb::Error::Io => TransportError::Io,
        rusb::Error::InvalidParam => TransportError::InvalidParam,
        rusb::Error::Access => TransportError::Access,
        rusb::Error::NotSupported => TransportError::NotSupported,
        rusb::Error::NoMem => TransportError::NoMem,
        _ => TransportError::Other {
            message: err.to_string(),
        },
    }
}

fn transport(err: rusb::Error) -> Error {
    Error::Transport(map_rusb_error(err))
}

type SharedHandle = Arc<Mutex<DeviceHandle<Context>>>;

fn lock(handle: &SharedHandle) -> MutexGuard<'_, DeviceHandle<Context>> {
    handle.lock().unwrap_or_else(PoisonError::into_inner)
}

/// libusb-backed host.
pub struct RusbHost {
    context: Context,
    interface_number: u8,
}

impl RusbHost {
    /// Create a host claiming interface 0 of matched devices.
    pub fn new() -> Result<Self> {
        Self::with_interface(0)
    }

    /// Create a host claiming a specific interface number.
    pub fn with_interface(interface_number: u8) -> Result<Self> {
        let context = Context::new().map_err(|e| Error::Enumeration(map_rusb_error(e)))?;
        Ok(Self {
            context,
            interface_number,
        })
    }

    fn find_by_path(&self, path: &DevicePath) -> Result<rusb::Device<Context>> {
        let (bus, address) = parse_path(path)?;
        let devices = self
            .context
            .devices()
            .map_err(|e| Error::Enumeration(map_rusb_error(e)))?;
        devices
            .iter()
            .find(|d| d.bus_number() == bus && d.address() == address)
            .ok_or(Error::Transport(TransportError::NoDevice))
    }
}

impl UsbHost for RusbHost {
    type Handle = RusbHandle;
    type Iface = RusbInterface;

    fn device_path(&self, index: usize) -> Result<Option<DevicePath>> {
        let devices = self
            .context
            .devices()
            .map_err(|e| Error::Enumeration(map_rusb_error(e)))?;
        Ok(devices
            .iter()
            .nth(index)
            .map(|d| format_path(d.bus_number(), d.address())))
    }

    fn open_path(&self, path: &DevicePath) -> Result<Self::Handle> {
        let device = self.find_by_path(path)?;
        let handle = device.open().map_err(transport)?;
        Ok(RusbHandle {
            handle: Arc::new(Mutex::new(handle)),
        })
    }

    fn claim_interface(&self, handle: &Self::Handle) -> Result<Self::Iface> {
        let interface_number = self.interface_number;
        let write_packet_size;
        {
            let guard = lock(&handle.handle);

            // Take the interface away from any kernel driver first, the way
            // an exclusive vendor transport expects to own the device.
            match guard.kernel_driver_active(interface_number) {
                Ok(true) => {
                    debug!(interface_number, "detaching kernel driver");
                    if let Err(e) = guard.detach_kernel_driver(interface_number) {
                        debug!(interface_number, error = %e, "could not detach kernel driver");
                    }
                }
                Ok(false) => {}
                Err(e) => {
                    debug!(interface_number, error = %e, "could not query kernel driver state");
                }
            }

            guard.claim_interface(interface_number).map_err(transport)?;
            write_packet_size = write_endpoint_packet_size(&guard, interface_number);
        }

        Ok(RusbInterface {
            handle: handle.handle.clone(),
            interface_number,
            read_timeout: DESCRIPTOR_TIMEOUT,
            write_timeout: DESCRIPTOR_TIMEOUT,
            zlp_write: false,
            write_packet_size,
        })
    }
}

/// Opened raw device handle.
pub struct RusbHandle {
    handle: SharedHandle,
}

/// Claimed bulk interface on an open device.
pub struct RusbInterface {
    handle: SharedHandle,
    interface_number: u8,
    read_timeout: Duration,
    write_timeout: Duration,
    zlp_write: bool,
    write_packet_size: usize,
}

impl UsbInterface for RusbInterface {
    fn device_identity(&self) -> Result<DeviceIdentity> {
        let guard = lock(&self.handle);
        let descriptor = guard.device().device_descriptor().map_err(transport)?;
        Ok(DeviceIdentity {
            vendor_id: descriptor.vendor_id(),
            product_id: descriptor.product_id(),
            serial_index: descriptor.serial_number_string_index(),
        })
    }

    fn string_descriptor(&self, index: u8) -> Result<Vec<u8>> {
        let guard = lock(&self.handle);
        let mut buf = vec![0u8; MAX_STRING_DESCRIPTOR_LEN];
        let n = guard
            .read_control(
                rusb::request_type(
                    rusb::Direction::In,
                    rusb::RequestType::Standard,
                    rusb::Recipient::Device,
                ),
                REQUEST_GET_DESCRIPTOR,
                (DESCRIPTOR_TYPE_STRING << 8) | index as u16,
                LANGUAGE_ID_EN_US,
                &mut buf,
                DESCRIPTOR_TIMEOUT,
            )
            .map_err(transport)?;
        buf.truncate(n);
        Ok(buf)
    }

    fn set_pipe_timeout(&mut self, pipe: PipeId, timeout: Duration) -> Result<()> {
        if pipe.is_input() {
            self.read_timeout = timeout;
        } else {
            self.write_timeout = timeout;
        }
        Ok(())
    }

    fn set_short_packet_terminate(&mut self, pipe: PipeId) -> Result<()> {
        if pipe.is_input() {
            return Err(Error::InvalidArgument);
        }
        self.zlp_write = true;
        Ok(())
    }

    fn write_pipe(&mut self, pipe: PipeId, buf: &[u8]) -> Result<usize> {
        let guard = lock(&self.handle);
        let n = guard
            .write_bulk(pipe.0, buf, self.write_timeout)
            .map_err(transport)?;

        // libusb exposes no short-packet-terminate policy; an explicit
        // zero-length write marks the end of a transfer that fills whole
        // packets exactly.
        if self.zlp_write && n > 0 && n % self.write_packet_size == 0 {
            guard
                .write_bulk(pipe.0, &[], self.write_timeout)
                .map_err(transport)?;
        }
        Ok(n)
    }

    fn read_pipe(&mut self, pipe: PipeId, buf: &mut [u8]) -> Result<usize> {
        let guard = lock(&self.handle);
        guard
            .read_bulk(pipe.0, buf, self.read_timeout)
            .map_err(transport)
    }
}

impl Drop for RusbInterface {
    fn drop(&mut self) {
        let guard = lock(&self.handle);
        if let Err(e) = guard.release_interface(self.interface_number) {
            debug!(interface_number = self.interface_number, error = %e, "release_interface failed");
        }
        // Hand the interface back to whichever kernel driver had it.
        if let Err(e) = guard.attach_kernel_driver(self.interface_number) {
            debug!(interface_number = self.interface_number, error = %e, "kernel driver not reattached");
        }
    }
}

fn format_path(bus: u8, address: u8) -> DevicePath {
    DevicePath::new(format!("usb:{:03}:{:03}", bus, address))
}

fn parse_path(path: &DevicePath) -> Result<(u8, u8)> {
    let mut parts = path.as_str().splitn(3, ':');
    match (parts.next(), parts.next(), parts.next()) {
        (Some("usb"), Some(bus), Some(address)) => {
            let bus = bus.parse().map_err(|_| Error::InvalidArgument)?;
            let address = address.parse().map_err(|_| Error::InvalidArgument)?;
            Ok((bus, address))
        }
        _ => Err(Error::InvalidArgument),
    }
}

/// Max packet size of the bulk OUT endpoint, read from the active
/// configuration. Falls back to the full-speed bulk packet size when the
/// descriptor walk fails.
fn write_endpoint_packet_size(handle: &DeviceHandle<Context>, interface_number: u8) -> usize {
    let Ok(config) = handle.device().active_config_descriptor() else {
        return FALLBACK_PACKET_SIZE;
    };
    for interface in config.interfaces() {
        if interface.number() != interface_number {
            continue;
        }
        for descriptor in interface.descriptors() {
            for endpoint in descriptor.endpoint_descriptors() {
                if endpoint.address() == PIPE_WRITE.0 {
                    return sanitize_packet_size(endpoint.max_packet_size() as usize);
                }
            }
        }
    }
    FALLBACK_PACKET_SIZE
}

/// A device reporting a zero max packet size would make the packet-boundary
/// check in `write_pipe` divide by zero.
fn sanitize_packet_size(size: usize) -> usize {
    if size == 0 { FALLBACK_PACKET_SIZE } else { size }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_round_trip() {
        let path = format_path(1, 42);
        assert_eq!(path.as_str(), "usb:001:042");
        assert_eq!(parse_path(&path).unwrap(), (1, 42));
    }

    #[test]
    fn test_parse_rejects_foreign_tokens() {
        assert!(parse_path(&DevicePath::new("pci:00:1f")).is_err());
        assert!(parse_path(&DevicePath::new("usb:abc:001")).is_err());
        assert!(parse_path(&DevicePath::new("usb:001")).is_err());
    }

    #[test]
    fn test_zero_packet_size_falls_back() {
        assert_eq!(sanitize_packet_size(0), FALLBACK_PACKET_SIZE);
        assert_eq!(sanitize_packet_size(64), 64);
        assert_eq!(sanitize_packet_size(512), 512);
    }

    #[test]
    fn test_rusb_error_mapping() {
        assert_eq!(map_rusb_error(rusb::Error::Timeout), TransportError::Timeout);
        assert_eq!(map_rusb_error(rusb::Error::Busy), TransportError::Busy);
        assert_eq!(map_rusb_error(rusb::Error::Access), TransportError::Access);
        assert_eq!(
            map_rusb_error(rusb::Error::NoDevice),
            TransportError::NoDevice
        );
        assert!(matches!(
            map_rusb_error(rusb::Error::BadDescriptor),
            TransportError::Other { .. }
        ));
    }
}
