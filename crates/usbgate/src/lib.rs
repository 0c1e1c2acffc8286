//! Exclusive bulk-pipe sessions with a single USB peripheral.
//!
//! This crate locates one device among everything attached to the host by a
//! `{vendor id, product id, optional serial}` selector, opens it exclusively,
//! and exchanges length-bounded buffers over a pair of bulk pipes with a
//! bounded blocking time.
//!
//! The OS pieces (device enumeration, raw handle open, the pipe transport)
//! sit behind the [`UsbHost`] and [`UsbInterface`] traits. [`RusbHost`] is
//! the production implementation on top of libusb; [`testing`] provides a
//! scriptable in-memory host for tests.
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use usbgate::{RusbHost, Selector, find_device};
//!
//! # fn main() -> usbgate::Result<()> {
//! let host = RusbHost::new()?;
//! let selector = Selector::new(0x1050, 0x0030);
//! let mut session = find_device(&host, &selector, Duration::from_secs(5))?;
//!
//! let written = session.write(b"\x01\x02\x03")?;
//! let mut response = [0u8; 8192];
//! let received = session.read(&mut response)?;
//! # let _ = (written, received);
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod connector;
pub mod discover;
pub mod error;
pub mod identity;
pub mod rusb_host;
pub mod session;
pub mod testing;
pub mod types;

pub use backend::{QueryStatus, UsbHost, UsbInterface, resolve_sized_query};
pub use connector::Connector;
pub use discover::find_device;
pub use error::{Error, Result, TransportError};
pub use rusb_host::RusbHost;
pub use session::Session;
pub use types::{DeviceIdentity, DevicePath, PIPE_READ, PIPE_WRITE, PipeId, Selector};
