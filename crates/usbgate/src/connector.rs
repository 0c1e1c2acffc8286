//! A guarded single-session context: open-on-demand, identity
//! revalidation, and request/response proxying with reopen-on-failure.

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tracing::debug;

use crate::backend::UsbHost;
use crate::discover::find_device;
use crate::error::{Error, Result};
use crate::session::Session;
use crate::types::Selector;

/// Size of the receive buffer for proxied responses.
pub const RESPONSE_BUFFER_LEN: usize = 8192;

/// Holds at most one open [`Session`] for a fixed selector and lends it out
/// one caller at a time.
///
/// The connector opens lazily, reuses the cached session across calls, and
/// replaces it with a fresh discovery when the device stops answering. All
/// entry points serialize on an internal lock, so a connector can be shared
/// between threads.
pub struct Connector<H: UsbHost> {
    host: H,
    selector: Selector,
    timeout: Duration,
    session: Mutex<Option<Session<H>>>,
}

impl<H: UsbHost> Connector<H> {
    pub fn new(host: H, selector: Selector, timeout: Duration) -> Self {
        Self {
            host,
            selector,
            timeout,
            session: Mutex::new(None),
        }
    }

    /// Selector this connector scans for.
    pub fn selector(&self) -> &Selector {
        &self.selector
    }

    /// Open a session if none is cached. A cached session is reused as-is.
    pub fn open(&self) -> Result<()> {
        let mut slot = self.lock();
        self.ensure_open(&mut slot)
    }

    /// Drop the cached session, releasing its handles. Safe to call with no
    /// session open.
    pub fn close(&self) {
        let mut slot = self.lock();
        if let Some(mut session) = slot.take() {
            session.close();
        }
    }

    /// Verify that the cached session still answers with the expected
    /// vendor/product identity, opening one first if needed.
    ///
    /// A failing check is retried once against a freshly discovered session;
    /// if that one fails too, the error is returned rather than looping
    /// against a misbehaving device.
    pub fn check(&self) -> Result<()> {
        let mut slot = self.lock();
        self.ensure_open(&mut slot)?;

        let mut reopened = false;
        loop {
            let session = slot.as_ref().ok_or(Error::InvalidState)?;
            match session.check(self.selector.vendor_id, self.selector.product_id) {
                Ok(()) => return Ok(()),
                Err(e) if !reopened => {
                    self.reopen(&mut slot, &e)?;
                    reopened = true;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Write `request`, then read one response.
    ///
    /// On a transfer failure the session is reopened and the exchange is
    /// retried once; a second failure propagates to the caller.
    pub fn proxy(&self, request: &[u8]) -> Result<Vec<u8>> {
        if request.is_empty() {
            return Err(Error::InvalidArgument);
        }

        let mut slot = self.lock();
        self.ensure_open(&mut slot)?;

        let mut retried = false;
        loop {
            let session = slot.as_mut().ok_or(Error::InvalidState)?;
            match exchange(session, request) {
                Ok(response) => return Ok(response),
                Err(e) if !retried => {
                    self.reopen(&mut slot, &e)?;
                    retried = true;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn ensure_open(&self, slot: &mut Option<Session<H>>) -> Result<()> {
        if slot.is_some() {
            debug!("usb session already open");
            return Ok(());
        }
        *slot = Some(find_device(&self.host, &self.selector, self.timeout)?);
        Ok(())
    }

    fn reopen(&self, slot: &mut Option<Session<H>>, why: &Error) -> Result<()> {
        debug!(error = %why, "reopening usb session");
        if let Some(mut session) = slot.take() {
            session.close();
        }
        self.ensure_open(slot)
    }

    fn lock(&self) -> MutexGuard<'_, Option<Session<H>>> {
        // A panic while holding the lock leaves only an Option behind;
        // recover the guard instead of turning it into a second panic.
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn exchange<H: UsbHost>(session: &mut Session<H>, request: &[u8]) -> Result<Vec<u8>> {
    let written = session.write(request)?;
    debug!(written, request_len = request.len(), "usb endpoint write");

    let mut response = vec![0u8; RESPONSE_BUFFER_LEN];
    let received = session.read(&mut response)?;
    debug!(received, "usb endpoint read");

    response.truncate(received);
    Ok(response)
}
