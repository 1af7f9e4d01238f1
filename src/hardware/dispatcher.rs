//! Command dispatcher with per-session queueing
//!
//! The bus transport has no multiplexing: overlapping writes corrupt the
//! protocol state. Every session therefore owns one queue task that executes
//! commands strictly one after another.
//!
//! # Design
//!
//! - Callers submit jobs over a bounded `mpsc` channel and wait on a
//!   `oneshot` reply
//! - The queue task owns the transport and runs each call on the blocking
//!   pool; the next job is not taken until the previous call has returned
//! - Each caller waits at most the session timeout, covering both queueing
//!   and execution, and then gets `DispatchError::Timeout`
//!
//! # Timeouts do not cancel
//!
//! A blocking transport call cannot be interrupted. When a caller times out
//! while its call is executing, the call keeps running to completion on the
//! blocking pool and its result is discarded. The instrument state is then
//! unknown to the caller. Jobs whose caller gave up before execution started
//! are skipped.
//!
//! # Example
//!
//! ```no_run
//! use awg_supervision::hardware::{Dispatcher, SimulatedTransport};
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), awg_supervision::error::DispatchError> {
//! let (dispatcher, _queue_task) = Dispatcher::spawn(
//!     "TCPIP0::localhost::inst0::INSTR",
//!     Box::new(SimulatedTransport::new()),
//!     Duration::from_millis(3000),
//! );
//!
//! dispatcher.dispatch("*RST").await?;
//! let idn = dispatcher.dispatch_query("*idn?").await?;
//! println!("Instrument: {}", idn);
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use super::transport::Transport;
use crate::error::{DispatchError, TransportError};

/// Commands that can wait in the queue at once.
const QUEUE_DEPTH: usize = 100;

/// What the queue task should do with the transport
#[derive(Debug)]
enum Request {
    Write(String),
    Query(String),
    Binary { header: String, payload: Bytes },
}

impl Request {
    fn describe(&self) -> String {
        match self {
            Request::Write(command) | Request::Query(command) => command.clone(),
            Request::Binary { header, payload } => {
                format!("{}<{} bytes>", header, payload.len())
            }
        }
    }

    fn execute(&self, transport: &mut dyn Transport) -> Result<String, TransportError> {
        match self {
            Request::Write(command) => transport.write_line(command).map(|()| String::new()),
            Request::Query(command) => {
                transport.write_line(command)?;
                transport.read_line()
            }
            Request::Binary { header, payload } => transport
                .write_block(header, payload)
                .map(|()| String::new()),
        }
    }
}

/// Request plus the channel its result goes back on
#[derive(Debug)]
struct Job {
    request: Request,
    reply: oneshot::Sender<Result<String, TransportError>>,
}

/// Handle for submitting commands to one session's queue.
///
/// Calls take `&self`, so tasks sharing one handle are serialized through the
/// same queue. The handle is not `Clone`: dropping it is what ends the queue
/// task and closes the transport.
#[derive(Debug)]
pub struct Dispatcher {
    address: Arc<str>,
    timeout: Duration,
    command_tx: mpsc::Sender<Job>,
}

impl Dispatcher {
    /// Start the queue task for `transport`.
    ///
    /// The task ends, closing the transport, once the `Dispatcher` is dropped
    /// and the call in flight (if any) has returned.
    pub fn spawn(
        address: &str,
        transport: Box<dyn Transport>,
        timeout: Duration,
    ) -> (Self, JoinHandle<()>) {
        let (command_tx, command_rx) = mpsc::channel(QUEUE_DEPTH);
        let queue_task = tokio::spawn(run_command_queue(
            address.to_string(),
            transport,
            command_rx,
        ));
        let dispatcher = Self {
            address: Arc::from(address),
            timeout,
            command_tx,
        };
        (dispatcher, queue_task)
    }

    /// Resource address of the session
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Per-call timeout
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Send a command that has no response.
    ///
    /// # Errors
    /// - `Timeout` if the command did not complete within the session timeout
    /// - `Transport` if the bus write failed
    /// - `SessionClosed` if the queue task is gone
    pub async fn dispatch(&self, command: impl Into<String>) -> Result<(), DispatchError> {
        self.submit(Request::Write(command.into())).await.map(|_| ())
    }

    /// Send a query and return the response line.
    pub async fn dispatch_query(&self, command: impl Into<String>) -> Result<String, DispatchError> {
        self.submit(Request::Query(command.into())).await
    }

    /// Send `header` followed by `payload` as an IEEE 488.2 binary block.
    pub async fn dispatch_binary(
        &self,
        header: impl Into<String>,
        payload: Bytes,
    ) -> Result<(), DispatchError> {
        self.submit(Request::Binary {
            header: header.into(),
            payload,
        })
        .await
        .map(|_| ())
    }

    async fn submit(&self, request: Request) -> Result<String, DispatchError> {
        let command = request.describe();
        let (reply_tx, reply_rx) = oneshot::channel();
        let job = Job {
            request,
            reply: reply_tx,
        };

        let round_trip = async {
            self.command_tx
                .send(job)
                .await
                .map_err(|_| DispatchError::SessionClosed)?;
            reply_rx
                .await
                .map_err(|_| DispatchError::SessionClosed)?
                .map_err(DispatchError::from)
        };

        match tokio::time::timeout(self.timeout, round_trip).await {
            Ok(result) => result,
            Err(_) => {
                warn!(
                    address = %self.address,
                    command = %command,
                    timeout_ms = self.timeout.as_millis() as u64,
                    "AWG command timed out; instrument state unverified"
                );
                Err(DispatchError::Timeout {
                    command,
                    timeout: self.timeout,
                })
            }
        }
    }
}

/// Execute jobs one at a time until every sender is dropped, then close.
async fn run_command_queue(
    address: String,
    transport: Box<dyn Transport>,
    mut command_rx: mpsc::Receiver<Job>,
) {
    debug!(address = %address, "Starting AWG command queue task");
    let mut transport = Some(transport);

    while let Some(job) = command_rx.recv().await {
        if job.reply.is_closed() {
            debug!(
                address = %address,
                command = %job.request.describe(),
                "Skipping command abandoned by caller"
            );
            continue;
        }

        let Some(mut owned) = transport.take() else {
            let _ = job.reply.send(Err(TransportError::Closed));
            continue;
        };

        trace!(address = %address, command = %job.request.describe(), "Dispatching AWG command");

        let request = job.request;
        let outcome = tokio::task::spawn_blocking(move || {
            let result = request.execute(owned.as_mut());
            (owned, result)
        })
        .await;

        let result = match outcome {
            Ok((owned, result)) => {
                transport = Some(owned);
                result
            }
            Err(e) => {
                warn!(address = %address, error = %e, "AWG transport call panicked");
                Err(TransportError::Io(format!("Transport call panicked: {}", e)))
            }
        };

        // The caller may have timed out meanwhile.
        let _ = job.reply.send(result);
    }

    if let Some(mut owned) = transport {
        let closed = tokio::task::spawn_blocking(move || owned.close()).await;
        match closed {
            Ok(Ok(())) => debug!(address = %address, "AWG transport closed"),
            Ok(Err(e)) => warn!(address = %address, error = %e, "Failed to close AWG transport"),
            Err(e) => warn!(address = %address, error = %e, "AWG transport close panicked"),
        }
    }

    debug!(address = %address, "AWG command queue task ended");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::SimulatedTransport;

    const ADDRESS: &str = "TCPIP0::localhost::inst0::INSTR";

    fn spawn(transport: &SimulatedTransport, timeout: Duration) -> (Dispatcher, JoinHandle<()>) {
        Dispatcher::spawn(ADDRESS, Box::new(transport.clone()), timeout)
    }

    #[tokio::test]
    async fn test_dispatch_write() {
        let transport = SimulatedTransport::new();
        let (dispatcher, _task) = spawn(&transport, Duration::from_secs(1));

        dispatcher.dispatch("*RST").await.unwrap();
        assert_eq!(transport.call_log(), vec!["write *RST"]);
    }

    #[tokio::test]
    async fn test_dispatch_query() {
        let transport = SimulatedTransport::new();
        transport.push_response("Keysight Technologies,M8195A,X,1");
        let (dispatcher, _task) = spawn(&transport, Duration::from_secs(1));

        let response = dispatcher.dispatch_query("*idn?").await.unwrap();
        assert_eq!(response, "Keysight Technologies,M8195A,X,1");
        assert_eq!(transport.call_log(), vec!["write *idn?", "read"]);
    }

    #[tokio::test]
    async fn test_dispatch_binary() {
        let transport = SimulatedTransport::new();
        let (dispatcher, _task) = spawn(&transport, Duration::from_secs(1));

        dispatcher
            .dispatch_binary(":TRAC1:data 1,0,", Bytes::from_static(&[1, 2, 3]))
            .await
            .unwrap();
        assert_eq!(transport.call_log(), vec!["block :TRAC1:data 1,0,<3 bytes>"]);
    }

    #[tokio::test]
    async fn test_transport_failure_surfaces() {
        let transport = SimulatedTransport::new();
        transport.inject_next_failure();
        let (dispatcher, _task) = spawn(&transport, Duration::from_secs(1));

        let err = dispatcher.dispatch("*RST").await.unwrap_err();
        assert!(matches!(err, DispatchError::Transport(TransportError::Io(_))));

        // Queue keeps working after a failed call
        dispatcher.dispatch("*RST").await.unwrap();
    }

    #[tokio::test]
    async fn test_command_ordering() {
        let transport = SimulatedTransport::new();
        let (dispatcher, _task) = spawn(&transport, Duration::from_secs(1));

        let cmd1 = dispatcher.dispatch(":ABOR");
        let cmd2 = dispatcher.dispatch("*RST");
        let cmd3 = dispatcher.dispatch_query("*idn?");
        let (r1, r2, r3) = tokio::join!(cmd1, cmd2, cmd3);

        assert!(r1.is_ok() && r2.is_ok() && r3.is_ok());
        assert_eq!(transport.max_concurrent_calls(), 1);
    }

    #[tokio::test]
    async fn test_timeout_does_not_cancel_transport_call() {
        let transport = SimulatedTransport::new().with_latency(Duration::from_millis(200));
        let (dispatcher, _task) = spawn(&transport, Duration::from_millis(50));

        let err = dispatcher.dispatch(":INIT:IMM").await.unwrap_err();
        assert_eq!(
            err,
            DispatchError::Timeout {
                command: ":INIT:IMM".to_string(),
                timeout: Duration::from_millis(50)
            }
        );

        // Caller has observed Timeout, but the write was not preempted.
        assert!(transport.call_log().is_empty());
        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(transport.call_log(), vec!["write :INIT:IMM"]);
    }

    #[tokio::test]
    async fn test_transport_closed_when_dispatcher_dropped() {
        let transport = SimulatedTransport::new();
        let (dispatcher, task) = spawn(&transport, Duration::from_secs(1));

        dispatcher.dispatch("*RST").await.unwrap();
        drop(dispatcher);

        task.await.unwrap();
        assert_eq!(transport.close_count(), 1);
        assert_eq!(transport.call_log(), vec!["write *RST", "close"]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_close_waits_for_call_in_flight() {
        let transport = SimulatedTransport::new().with_latency(Duration::from_millis(150));
        let (dispatcher, task) = spawn(&transport, Duration::from_millis(20));

        let err = dispatcher.dispatch("*RST").await.unwrap_err();
        assert!(matches!(err, DispatchError::Timeout { .. }));
        drop(dispatcher);

        // The queue task outlives the handle until the write returns.
        task.await.unwrap();
        assert_eq!(transport.call_log(), vec!["write *RST", "close"]);
    }
}
