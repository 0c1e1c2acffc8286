//! Device discovery: scan the enumeration in order, test each candidate,
//! and hand the first match over as an open [`Session`].

use std::time::Duration;

use tracing::{debug, info, warn};

use crate::backend::{UsbHost, UsbInterface};
use crate::error::{Error, Result};
use crate::identity;
use crate::session::Session;
use crate::types::{PIPE_READ, PIPE_WRITE, Selector};

/// Scan all enumerated devices for the first one matching `selector` and
/// open an exclusive session on it.
///
/// Candidates are inspected strictly in enumeration order and the first
/// match wins; no later candidate is touched. Failures confined to one
/// candidate (open, transport init, descriptor queries, pipe policy) skip
/// that candidate and the scan continues. Only a failure of the enumeration
/// subsystem itself aborts the scan.
///
/// `timeout` bounds every later blocking transfer on the session, applied to
/// the read pipe and the write pipe independently.
///
/// Every rejected candidate's handles are released before the next index is
/// inspected; on any failure of the overall scan no handle stays open.
pub fn find_device<H: UsbHost>(
    host: &H,
    selector: &Selector,
    timeout: Duration,
) -> Result<Session<H>> {
    for index in 0.. {
        // `path`, `handle`, and `iface` drop at the bottom of this iteration
        // unless the candidate is accepted, so a rejected candidate never
        // holds resources past its own turn.
        let path = match host.device_path(index)? {
            Some(path) => path,
            None => break,
        };

        let handle = match host.open_path(&path) {
            Ok(handle) => handle,
            Err(e) => {
                debug!(%path, error = %e, "could not open candidate");
                continue;
            }
        };

        let mut iface = match host.claim_interface(&handle) {
            Ok(iface) => iface,
            Err(Error::Transport(e)) if e.is_benign_claim_failure() => {
                debug!(%path, error = %e, "candidate unavailable");
                continue;
            }
            Err(e) => {
                warn!(%path, error = %e, "transport init failed");
                continue;
            }
        };

        match identity::matches(&iface, selector) {
            Ok(true) => {}
            Ok(false) => {
                debug!(%path, "candidate does not match selector");
                continue;
            }
            Err(e) => {
                warn!(%path, error = %e, "skipping candidate that could not be evaluated");
                continue;
            }
        }

        if let Err(e) = configure_pipes(&mut iface, timeout) {
            warn!(%path, error = %e, "pipe policy configuration failed, continuing scan");
            continue;
        }

        info!(%path, selector = %selector, "matched device");
        return Ok(Session::new(handle, iface, PIPE_READ, PIPE_WRITE));
    }

    Err(Error::NotFound)
}

/// Apply the transfer policies an accepted device needs before it becomes a
/// session: the caller's timeout on both pipes, and zero-length-packet
/// termination on the write pipe so transfers that end exactly on a packet
/// boundary are unambiguous to the receiver.
fn configure_pipes<I: UsbInterface>(iface: &mut I, timeout: Duration) -> Result<()> {
    iface.set_pipe_timeout(PIPE_READ, timeout)?;
    iface.set_pipe_timeout(PIPE_WRITE, timeout)?;
    iface.set_short_packet_terminate(PIPE_WRITE)?;
    Ok(())
}
