//! VISA transport for GPIB/USB/LAN instruments.
//!
//! Wraps the visa-rs crate. Supports resource strings like:
//! - "TCPIP0::192.168.1.100::hislip0::INSTR" (LAN / HiSLIP)
//! - "TCPIP0::localhost::inst0::INSTR" (M8195A soft front panel)
//! - "GPIB0::1::INSTR" (GPIB)
//!
//! Without the `instrument_visa` feature every open fails with
//! `FeatureNotEnabled`, which surfaces to callers as a `ConnectError`.

use std::time::Duration;

use super::transport::{Connector, Transport};
use crate::error::TransportError;

#[cfg(feature = "instrument_visa")]
use std::io::{Read, Write};
#[cfg(feature = "instrument_visa")]
use tracing::debug;
#[cfg(feature = "instrument_visa")]
use visa_rs::prelude::*;

/// Opens VISA resources through the default resource manager.
#[derive(Debug, Clone, Copy, Default)]
pub struct VisaConnector;

impl VisaConnector {
    /// Create a VISA connector
    pub fn new() -> Self {
        Self
    }
}

/// An open VISA session.
#[cfg(feature = "instrument_visa")]
pub struct VisaTransport {
    // Declared before the resource manager so it is dropped first.
    instrument: Option<Instrument>,
    _rm: DefaultRM,
    address: String,
}

#[cfg(feature = "instrument_visa")]
fn visa_error(err: impl std::fmt::Display) -> TransportError {
    TransportError::Io(err.to_string())
}

#[cfg(feature = "instrument_visa")]
impl VisaTransport {
    fn instrument(&mut self) -> Result<&mut Instrument, TransportError> {
        self.instrument.as_mut().ok_or(TransportError::Closed)
    }
}

#[cfg(feature = "instrument_visa")]
impl Transport for VisaTransport {
    fn write_raw(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        let instrument = self.instrument()?;
        instrument.write_all(bytes).map_err(visa_error)?;
        instrument.flush().map_err(visa_error)
    }

    fn read_line(&mut self) -> Result<String, TransportError> {
        let mut buf = [0u8; 4096];
        let count = self.instrument()?.read(&mut buf).map_err(visa_error)?;
        Ok(String::from_utf8_lossy(&buf[..count])
            .trim_end_matches('\0')
            .trim_end()
            .to_string())
    }

    fn close(&mut self) -> Result<(), TransportError> {
        if self.instrument.take().is_some() {
            debug!(address = %self.address, "VISA resource closed");
        }
        Ok(())
    }
}

#[cfg(feature = "instrument_visa")]
impl Connector for VisaConnector {
    fn open(&self, address: &str, timeout: Duration) -> Result<Box<dyn Transport>, TransportError> {
        let rm = DefaultRM::new().map_err(visa_error)?;
        let resource = std::ffi::CString::new(address)
            .map_err(|e| TransportError::Io(format!("Invalid resource string: {}", e)))?;
        let visa_string = visa_rs::VisaString::from(resource);
        let instrument = rm
            .open(&visa_string, AccessMode::NO_LOCK, timeout)
            .map_err(visa_error)?;

        debug!(
            address,
            timeout_ms = timeout.as_millis() as u64,
            "VISA resource opened"
        );
        Ok(Box::new(VisaTransport {
            instrument: Some(instrument),
            _rm: rm,
            address: address.to_string(),
        }))
    }
}

#[cfg(not(feature = "instrument_visa"))]
impl Connector for VisaConnector {
    fn open(&self, _address: &str, _timeout: Duration) -> Result<Box<dyn Transport>, TransportError> {
        Err(TransportError::FeatureNotEnabled("instrument_visa".to_string()))
    }
}
