//! Traits separating this crate from the OS device subsystems.
//!
//! Discovery and sessions only ever talk to an enumeration provider, a raw
//! device opener, and a pipe-capable interface through these traits.
//! [`crate::rusb_host::RusbHost`] implements them over libusb;
//! [`crate::testing`] implements them in memory.

use std::time::Duration;

use crate::error::{Error, Result, TransportError};
use crate::types::{DeviceIdentity, DevicePath, PipeId};

/// One attached-device list plus the calls to turn an entry into a live,
/// pipe-capable interface.
///
/// Enumeration is indexed and restartable: `device_path(0)` after a
/// completed scan starts over from the current device list.
pub trait UsbHost {
    /// Opened raw device handle. Dropping it must release the OS handle.
    type Handle;
    /// Pipe-capable interface claimed on top of a raw handle. Dropping it
    /// must release the claim.
    type Iface: UsbInterface;

    /// Resolve the device path at `index` in enumeration order.
    ///
    /// `Ok(None)` means enumeration is exhausted. `Err` means the
    /// enumeration subsystem itself failed and the scan must stop; failures
    /// confined to one candidate are reported by [`UsbHost::open_path`]
    /// instead.
    fn device_path(&self, index: usize) -> Result<Option<DevicePath>>;

    /// Open a resolved path for read/write. The handle must be capable of
    /// whatever submission model the transport requires, even though this
    /// crate only ever waits synchronously.
    fn open_path(&self, path: &DevicePath) -> Result<Self::Handle>;

    /// Initialize the vendor transport on an open handle, claiming the
    /// device's bulk interface.
    fn claim_interface(&self, handle: &Self::Handle) -> Result<Self::Iface>;
}

// A borrowed host is a host; lets long-lived owners like
// `crate::connector::Connector` share one host with their caller.
impl<H: UsbHost> UsbHost for &H {
    type Handle = H::Handle;
    type Iface = H::Iface;

    fn device_path(&self, index: usize) -> Result<Option<DevicePath>> {
        (**self).device_path(index)
    }

    fn open_path(&self, path: &DevicePath) -> Result<Self::Handle> {
        (**self).open_path(path)
    }

    fn claim_interface(&self, handle: &Self::Handle) -> Result<Self::Iface> {
        (**self).claim_interface(handle)
    }
}

/// Descriptor queries, pipe policy, and blocking transfers on one claimed
/// device interface.
pub trait UsbInterface {
    /// Read vendor id, product id, and the serial string index from the
    /// device descriptor.
    fn device_identity(&self) -> Result<DeviceIdentity>;

    /// Read a raw string descriptor: length byte, type byte, then UTF-16LE
    /// character data.
    fn string_descriptor(&self, index: u8) -> Result<Vec<u8>>;

    /// Bound every blocking transfer on `pipe` by `timeout`.
    fn set_pipe_timeout(&mut self, pipe: PipeId, timeout: Duration) -> Result<()>;

    /// Terminate writes on `pipe` whose length is an exact multiple of the
    /// packet size with a zero-length packet, so the receiver can detect the
    /// end of the transfer.
    fn set_short_packet_terminate(&mut self, pipe: PipeId) -> Result<()>;

    /// Blocking bulk write. Returns the bytes actually moved; short writes
    /// are reported as-is.
    fn write_pipe(&mut self, pipe: PipeId, buf: &[u8]) -> Result<usize>;

    /// Blocking bulk read into `buf`. Returns the bytes actually moved.
    fn read_pipe(&mut self, pipe: PipeId, buf: &mut [u8]) -> Result<usize>;
}

/// Outcome of a single call against a size-then-fill OS query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryStatus {
    /// The query wrote `len` bytes into the supplied buffer.
    Filled(usize),
    /// The supplied buffer (or lack of one) was too small; `len` bytes are
    /// required.
    InsufficientBuffer(usize),
    /// The queried index is past the end of the device list.
    NoMoreItems,
    /// The query failed outright.
    Failed(TransportError),
}

/// Drive a two-phase size-then-fill query to completion, hiding the sizing
/// protocol from callers.
///
/// The first call is made without a buffer and is expected to report
/// [`QueryStatus::InsufficientBuffer`]; the second call fills an owned
/// buffer of exactly the required size. A sizing call that reports success
/// violates the protocol and indicates a broken enumeration subsystem, so it
/// is escalated as a scan-aborting error rather than treated as data.
pub fn resolve_sized_query<F>(mut query: F) -> Result<Option<Vec<u8>>>
where
    F: FnMut(Option<&mut [u8]>) -> QueryStatus,
{
    let needed = match query(None) {
        QueryStatus::InsufficientBuffer(needed) => needed,
        QueryStatus::NoMoreItems => return Ok(None),
        QueryStatus::Failed(e) => return Err(Error::Enumeration(e)),
        QueryStatus::Filled(_) => {
            // The sizing call must not succeed; no sense in trusting
            // anything else this subsystem reports.
            return Err(Error::Enumeration(TransportError::Other {
                message: "sizing query succeeded without a buffer".into(),
            }));
        }
    };

    let mut buf = vec![0u8; needed];
    match query(Some(&mut buf)) {
        QueryStatus::Filled(len) if len <= needed => {
            buf.truncate(len);
            Ok(Some(buf))
        }
        QueryStatus::Filled(len) => Err(Error::Enumeration(TransportError::Other {
            message: format!("fill query reported {} bytes into a {} byte buffer", len, needed),
        })),
        QueryStatus::NoMoreItems => Ok(None),
        QueryStatus::InsufficientBuffer(_) => Err(Error::Enumeration(TransportError::Other {
            message: "fill query rejected the sized buffer".into(),
        })),
        QueryStatus::Failed(e) => Err(Error::Enumeration(e)),
    }
}
