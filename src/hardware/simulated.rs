//! Simulated transport for testing and `--simulate` runs.
//!
//! Provides a software stand-in for the AWG bus connection with:
//! - A shared call log for verifying command order
//! - Captured binary blocks, framed exactly as they go on the bus
//! - Scripted query responses (FIFO), with sensible defaults for
//!   `*idn?` and `SYSTem:ERRor?`
//! - Simulated per-call latency
//! - Failure injection for the next call or the next open
//! - Concurrency tracking, to prove calls never overlap

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tracing::trace;

use super::transport::{frame_ieee_block, Connector, Transport};
use crate::error::TransportError;

/// Identity string returned for `*idn?` when nothing is scripted.
pub const SIMULATED_IDENTITY: &str = "Keysight Technologies,M8195A,SIM0000001,4.0.0.0";

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Default)]
struct Shared {
    call_log: Mutex<Vec<String>>,
    blocks: Mutex<Vec<Vec<u8>>>,
    responses: Mutex<VecDeque<String>>,
    last_command: Mutex<String>,
    latency: Mutex<Duration>,
    fail_next: AtomicBool,
    closed: AtomicBool,
    close_count: AtomicUsize,
    active_calls: AtomicUsize,
    max_active_calls: AtomicUsize,
}

/// In-process AWG stand-in. Clones share state.
///
/// # Example
///
/// ```
/// use awg_supervision::hardware::{SimulatedTransport, Transport};
///
/// let mut transport = SimulatedTransport::new();
/// transport.push_response("1,overrange");
/// transport.write_line("SYSTem:ERRor?").unwrap();
/// assert_eq!(transport.read_line().unwrap(), "1,overrange");
/// assert_eq!(transport.call_log(), vec!["write SYSTem:ERRor?", "read"]);
/// ```
#[derive(Clone, Default)]
pub struct SimulatedTransport {
    shared: Arc<Shared>,
}

impl SimulatedTransport {
    /// Create a simulated transport with no latency
    pub fn new() -> Self {
        Self::default()
    }

    /// Set simulated latency for every call
    pub fn with_latency(self, latency: Duration) -> Self {
        *lock(&self.shared.latency) = latency;
        self
    }

    /// Queue a response for the next `read_line`
    pub fn push_response(&self, response: impl Into<String>) {
        lock(&self.shared.responses).push_back(response.into());
    }

    /// Make the next transport call fail
    pub fn inject_next_failure(&self) {
        self.shared.fail_next.store(true, Ordering::SeqCst);
    }

    /// Get the call log
    pub fn call_log(&self) -> Vec<String> {
        lock(&self.shared.call_log).clone()
    }

    /// Commands written so far (`write` and `block` entries, without the prefix)
    pub fn written_commands(&self) -> Vec<String> {
        self.call_log()
            .into_iter()
            .filter_map(|entry| {
                entry
                    .strip_prefix("write ")
                    .or_else(|| entry.strip_prefix("block "))
                    .map(str::to_string)
            })
            .collect()
    }

    /// Framed binary blocks written so far, header and terminator included
    pub fn written_blocks(&self) -> Vec<Vec<u8>> {
        lock(&self.shared.blocks).clone()
    }

    /// Clear the call log and captured blocks
    pub fn clear_log(&self) {
        lock(&self.shared.call_log).clear();
        lock(&self.shared.blocks).clear();
    }

    /// Number of times `close` reached the transport
    pub fn close_count(&self) -> usize {
        self.shared.close_count.load(Ordering::SeqCst)
    }

    /// True once the transport has been closed
    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }

    /// Highest number of calls observed in flight at the same time
    pub fn max_concurrent_calls(&self) -> usize {
        self.shared.max_active_calls.load(Ordering::SeqCst)
    }

    fn log_call(&self, call: String) {
        trace!(call = %call, "Simulated AWG call");
        lock(&self.shared.call_log).push(call);
    }

    /// Run `f` as one transport call: latency, failure injection, overlap tracking.
    fn call<T>(
        &self,
        entry: String,
        f: impl FnOnce() -> Result<T, TransportError>,
    ) -> Result<T, TransportError> {
        let active = self.shared.active_calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.shared.max_active_calls.fetch_max(active, Ordering::SeqCst);

        let latency = *lock(&self.shared.latency);
        if !latency.is_zero() {
            std::thread::sleep(latency);
        }

        let result = if self.shared.closed.load(Ordering::SeqCst) {
            Err(TransportError::Closed)
        } else if self.shared.fail_next.swap(false, Ordering::SeqCst) {
            Err(TransportError::Io("Injected failure".to_string()))
        } else {
            self.log_call(entry);
            f()
        };

        self.shared.active_calls.fetch_sub(1, Ordering::SeqCst);
        result
    }

    fn default_response(command: &str) -> String {
        let command = command.trim().to_ascii_uppercase();
        if command == "*IDN?" {
            SIMULATED_IDENTITY.to_string()
        } else if command.starts_with("SYST") && command.contains(":ERR") {
            "0,\"No error\"".to_string()
        } else {
            String::new()
        }
    }
}

impl Transport for SimulatedTransport {
    fn write_raw(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        let text = String::from_utf8_lossy(bytes).trim_end().to_string();
        self.call(format!("write {}", text), || {
            *lock(&self.shared.last_command) = text.clone();
            Ok(())
        })
    }

    fn write_line(&mut self, command: &str) -> Result<(), TransportError> {
        self.call(format!("write {}", command), || {
            *lock(&self.shared.last_command) = command.to_string();
            Ok(())
        })
    }

    fn write_block(&mut self, header: &str, payload: &[u8]) -> Result<(), TransportError> {
        let frame = frame_ieee_block(header, payload)?;
        self.call(format!("block {}<{} bytes>", header, payload.len()), || {
            *lock(&self.shared.last_command) = header.to_string();
            lock(&self.shared.blocks).push(frame);
            Ok(())
        })
    }

    fn read_line(&mut self) -> Result<String, TransportError> {
        self.call("read".to_string(), || {
            let scripted = lock(&self.shared.responses).pop_front();
            Ok(scripted
                .unwrap_or_else(|| Self::default_response(&lock(&self.shared.last_command))))
        })
    }

    fn close(&mut self) -> Result<(), TransportError> {
        self.shared.close_count.fetch_add(1, Ordering::SeqCst);
        self.shared.closed.store(true, Ordering::SeqCst);
        self.log_call("close".to_string());
        Ok(())
    }
}

/// Connector handing out clones of one [`SimulatedTransport`].
#[derive(Clone, Default)]
pub struct SimulatedConnector {
    transport: SimulatedTransport,
    fail_next_open: Arc<AtomicBool>,
    open_log: Arc<Mutex<Vec<String>>>,
}

impl SimulatedConnector {
    /// Connector backed by a fresh transport
    pub fn new() -> Self {
        Self::default()
    }

    /// Connector backed by `transport`
    pub fn with_transport(transport: SimulatedTransport) -> Self {
        Self {
            transport,
            ..Self::default()
        }
    }

    /// The shared transport (for inspection in tests)
    pub fn transport(&self) -> &SimulatedTransport {
        &self.transport
    }

    /// Make the next `open` fail
    pub fn inject_open_failure(&self) {
        self.fail_next_open.store(true, Ordering::SeqCst);
    }

    /// Addresses opened so far
    pub fn opened(&self) -> Vec<String> {
        lock(&self.open_log).clone()
    }
}

impl Connector for SimulatedConnector {
    fn open(&self, address: &str, _timeout: Duration) -> Result<Box<dyn Transport>, TransportError> {
        if self.fail_next_open.swap(false, Ordering::SeqCst) {
            return Err(TransportError::Io(format!("No device at {}", address)));
        }
        lock(&self.open_log).push(address.to_string());
        // A reopened simulator starts with a live link again.
        self.transport.shared.closed.store(false, Ordering::SeqCst);
        Ok(Box::new(self.transport.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_responses() {
        let mut transport = SimulatedTransport::new();
        transport.write_line("*idn?").unwrap();
        assert_eq!(transport.read_line().unwrap(), SIMULATED_IDENTITY);
        transport.write_line("SYSTem:ERRor?").unwrap();
        assert_eq!(transport.read_line().unwrap(), "0,\"No error\"");
    }

    #[test]
    fn test_scripted_responses_take_priority() {
        let mut transport = SimulatedTransport::new();
        transport.push_response("custom");
        transport.write_line("*idn?").unwrap();
        assert_eq!(transport.read_line().unwrap(), "custom");
        assert_eq!(transport.read_line().unwrap(), SIMULATED_IDENTITY);
    }

    #[test]
    fn test_failure_injection_is_consumed() {
        let mut transport = SimulatedTransport::new();
        transport.inject_next_failure();
        assert!(transport.write_line("*RST").is_err());
        assert!(transport.write_line("*RST").is_ok());
        assert_eq!(transport.written_commands(), vec!["*RST"]);
    }

    #[test]
    fn test_closed_transport_rejects_calls() {
        let mut transport = SimulatedTransport::new();
        transport.close().unwrap();
        assert_eq!(transport.write_line("*RST"), Err(TransportError::Closed));
        assert_eq!(transport.close_count(), 1);
    }

    #[test]
    fn test_block_logging() {
        let mut transport = SimulatedTransport::new();
        transport.write_block(":TRAC1:data 1,0,", &[0; 16]).unwrap();
        assert_eq!(transport.call_log(), vec!["block :TRAC1:data 1,0,<16 bytes>"]);

        let mut expected = b":TRAC1:data 1,0,#216".to_vec();
        expected.extend_from_slice(&[0; 16]);
        expected.push(b'\n');
        assert_eq!(transport.written_blocks(), vec![expected]);
    }

    #[test]
    fn test_connector_open_failure() {
        let connector = SimulatedConnector::new();
        connector.inject_open_failure();
        assert!(connector.open("TCPIP0::sim::INSTR", Duration::from_secs(1)).is_err());
        assert!(connector.open("TCPIP0::sim::INSTR", Duration::from_secs(1)).is_ok());
        assert_eq!(connector.opened(), vec!["TCPIP0::sim::INSTR"]);
    }
}
