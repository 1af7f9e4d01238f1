//! AWG session lifecycle: open, identity query, close.
//!
//! A [`Session`] is one live connection to a physical AWG. It owns the
//! dispatcher queue; closing the session stops the queue, which closes the
//! transport exactly once. Dispatching on a closed session fails with
//! `NotConnected` without touching the bus.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::dispatcher::Dispatcher;
use super::transport::Connector;
use crate::error::{ConnectError, DispatchError, TransportError};
use crate::instrument::scpi;

/// Default per-call timeout in milliseconds.
pub const DEFAULT_TIMEOUT_MS: u64 = 3000;

/// One live connection to an AWG.
#[derive(Debug)]
pub struct Session {
    address: String,
    timeout: Duration,
    dispatcher: Option<Dispatcher>,
    queue_task: Option<JoinHandle<()>>,
}

impl Session {
    /// Open `address` through `connector` with the given per-call timeout.
    ///
    /// Opening has no protocol side effect; no command is sent.
    ///
    /// # Errors
    /// `ConnectError` if the bus resource cannot be opened.
    pub async fn connect(
        connector: Arc<dyn Connector>,
        address: &str,
        timeout: Duration,
    ) -> Result<Self, ConnectError> {
        debug!(address, timeout_ms = timeout.as_millis() as u64, "Opening AWG session");

        let target = address.to_string();
        let opened = tokio::task::spawn_blocking(move || connector.open(&target, timeout))
            .await
            .map_err(|e| TransportError::Io(format!("Open task panicked: {}", e)))
            .and_then(|result| result);

        let transport = opened.map_err(|source| {
            warn!(address, error = %source, "Failed to open AWG session");
            ConnectError {
                address: address.to_string(),
                source,
            }
        })?;

        let (dispatcher, queue_task) = Dispatcher::spawn(address, transport, timeout);
        info!(address, "AWG session established");

        Ok(Self {
            address: address.to_string(),
            timeout,
            dispatcher: Some(dispatcher),
            queue_task: Some(queue_task),
        })
    }

    /// Resource address
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Per-call timeout
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// True until [`close`](Self::close) is called
    pub fn is_connected(&self) -> bool {
        self.dispatcher.is_some()
    }

    fn dispatcher(&self) -> Result<&Dispatcher, DispatchError> {
        self.dispatcher.as_ref().ok_or(DispatchError::NotConnected)
    }

    /// See [`Dispatcher::dispatch`].
    pub async fn dispatch(&self, command: impl Into<String>) -> Result<(), DispatchError> {
        self.dispatcher()?.dispatch(command).await
    }

    /// See [`Dispatcher::dispatch_query`].
    pub async fn dispatch_query(&self, command: impl Into<String>) -> Result<String, DispatchError> {
        self.dispatcher()?.dispatch_query(command).await
    }

    /// See [`Dispatcher::dispatch_binary`].
    pub async fn dispatch_binary(
        &self,
        header: impl Into<String>,
        payload: Bytes,
    ) -> Result<(), DispatchError> {
        self.dispatcher()?.dispatch_binary(header, payload).await
    }

    /// Query the instrument identity (`*idn?`) and return the raw response.
    pub async fn identity(&self) -> Result<String, DispatchError> {
        self.dispatch_query(scpi::IDENTITY).await
    }

    /// Release the bus resource.
    ///
    /// Idempotent. Returns only after the transport has been closed. A call
    /// still running after a `Timeout` is waited for; it is bounded by the
    /// bus I/O timeout the transport was opened with.
    pub async fn close(&mut self) {
        let Some(dispatcher) = self.dispatcher.take() else {
            return;
        };
        debug!(address = %self.address, "Closing AWG session");

        // Dropping the only sender ends the queue task, which closes the transport.
        drop(dispatcher);

        if let Some(task) = self.queue_task.take() {
            match task.await {
                Ok(()) => info!(address = %self.address, "AWG session closed"),
                Err(e) => warn!(address = %self.address, error = %e, "AWG queue task failed"),
            }
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        // Without an await point the queue task is left to shut itself down.
        if self.dispatcher.take().is_some() {
            debug!(address = %self.address, "AWG session dropped without close");
        }
    }
}
