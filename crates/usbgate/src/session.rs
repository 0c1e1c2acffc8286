//! The long-lived handle bundle for one accepted device.

use std::fmt;

use tracing::debug;

use crate::backend::{UsbHost, UsbInterface};
use crate::error::{Error, Result};
use crate::types::{PipeId, Selector};

/// An open, exclusively-owned byte-pipe session with one device.
///
/// A session exists only in two observable states: open (both the raw handle
/// and the claimed interface are live) or closed (everything released, the
/// object inert). There is no partially-valid state and no way back from
/// closed; discovery is the only way to obtain an open session.
///
/// The session itself takes no locks. The read and write pipes are
/// configured independently and the transport may support concurrent use of
/// the two directions, but callers issuing reads and writes from different
/// threads must bring their own synchronization.
pub struct Session<H: UsbHost> {
    inner: Option<Inner<H>>,
    read_pipe: PipeId,
    write_pipe: PipeId,
}

struct Inner<H: UsbHost> {
    // Declared before the raw handle so the interface claim is released
    // first, then the handle itself. The handle is held only to keep the
    // device open for the interface's lifetime.
    iface: H::Iface,
    _handle: H::Handle,
}

impl<H: UsbHost> Session<H> {
    /// Bundle a freshly accepted candidate's handles into an open session.
    /// Only the scanner constructs sessions.
    pub(crate) fn new(
        handle: H::Handle,
        iface: H::Iface,
        read_pipe: PipeId,
        write_pipe: PipeId,
    ) -> Self {
        Self {
            inner: Some(Inner {
                iface,
                _handle: handle,
            }),
            read_pipe,
            write_pipe,
        }
    }

    /// True while the session owns live handles.
    pub fn is_open(&self) -> bool {
        self.inner.is_some()
    }

    /// Release the interface claim and the raw handle. Idempotent; calling
    /// this on an already-closed session is a no-op. Dropping an open
    /// session has the same effect.
    pub fn close(&mut self) {
        if let Some(inner) = self.inner.take() {
            drop(inner);
            debug!("usb session closed");
        }
    }

    /// Re-validate that this session still talks to a device with the
    /// expected vendor/product identity (no serial check).
    ///
    /// Returns [`Error::NotFound`] if the identity no longer matches,
    /// [`Error::InvalidState`] on a closed session, and passes transport
    /// failures through verbatim.
    pub fn check(&self, vendor_id: u16, product_id: u16) -> Result<()> {
        let inner = self.inner.as_ref().ok_or(Error::InvalidState)?;
        if crate::identity::matches(&inner.iface, &Selector::new(vendor_id, product_id))? {
            Ok(())
        } else {
            Err(Error::NotFound)
        }
    }

    /// Blocking write on the session's write pipe, bounded by the timeout
    /// configured at discovery. Returns the bytes actually written; a short
    /// write is reported as-is, with no retry at this layer.
    pub fn write(&mut self, buf: &[u8]) -> Result<usize> {
        let inner = self.inner.as_mut().ok_or(Error::InvalidState)?;
        if buf.is_empty() {
            return Err(Error::InvalidArgument);
        }
        inner.iface.write_pipe(self.write_pipe, buf)
    }

    /// Blocking read on the session's read pipe, bounded by the timeout
    /// configured at discovery. Returns the bytes actually read.
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let inner = self.inner.as_mut().ok_or(Error::InvalidState)?;
        if buf.is_empty() {
            return Err(Error::InvalidArgument);
        }
        inner.iface.read_pipe(self.read_pipe, buf)
    }

    /// Pipe carrying device-to-host data.
    pub fn read_pipe(&self) -> PipeId {
        self.read_pipe
    }

    /// Pipe carrying host-to-device data.
    pub fn write_pipe(&self) -> PipeId {
        self.write_pipe
    }
}

// The handle types are opaque OS resources, so only the observable state is
// reported.
impl<H: UsbHost> fmt::Debug for Session<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("open", &self.is_open())
            .field("read_pipe", &self.read_pipe)
            .field("write_pipe", &self.write_pipe)
            .finish()
    }
}
