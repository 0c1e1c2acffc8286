//! Core value types: selectors, device identity, paths, and pipe ids.

use std::fmt;

/// Identifier of one unidirectional logical transfer channel on a device.
///
/// Bit 7 encodes direction: set for device-to-host (IN) pipes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PipeId(pub u8);

impl PipeId {
    /// True if this pipe carries data from the device to the host.
    pub fn is_input(self) -> bool {
        self.0 & 0x80 != 0
    }
}

impl fmt::Display for PipeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#04x}", self.0)
    }
}

/// Host-to-device bulk pipe used for writes.
pub const PIPE_WRITE: PipeId = PipeId(0x01);
/// Device-to-host bulk pipe used for reads.
pub const PIPE_READ: PipeId = PipeId(0x81);

/// Caller-supplied description of the one device to open.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selector {
    /// USB vendor id
    pub vendor_id: u16,
    /// USB product id
    pub product_id: u16,
    /// Serial number to match, compared case-insensitively. `None` matches
    /// on vendor/product alone.
    pub serial: Option<String>,
}

impl Selector {
    /// Selector matching on vendor and product id alone.
    pub fn new(vendor_id: u16, product_id: u16) -> Self {
        Self {
            vendor_id,
            product_id,
            serial: None,
        }
    }

    /// Selector additionally constrained to one serial number.
    pub fn with_serial(vendor_id: u16, product_id: u16, serial: impl Into<String>) -> Self {
        Self {
            vendor_id,
            product_id,
            serial: Some(serial.into()),
        }
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04x}:{:04x}", self.vendor_id, self.product_id)?;
        if let Some(serial) = &self.serial {
            write!(f, " serial {}", serial)?;
        }
        Ok(())
    }
}

/// Identity fields read from a device descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceIdentity {
    pub vendor_id: u16,
    pub product_id: u16,
    /// String-descriptor index of the serial number, if the device
    /// advertises one.
    pub serial_index: Option<u8>,
}

/// Opaque token for one enumerated device path.
///
/// Produced by a host's enumeration provider and handed back to it verbatim
/// when opening a candidate; callers never interpret the contents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DevicePath(String);

impl DevicePath {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DevicePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
