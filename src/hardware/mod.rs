//! Hardware Communication
//!
//! Bus transports, the per-session command queue, and session lifecycle.

pub mod dispatcher;
pub mod session;
pub mod simulated;
pub mod transport;
pub mod visa;

pub use dispatcher::Dispatcher;
pub use session::{Session, DEFAULT_TIMEOUT_MS};
pub use simulated::{SimulatedConnector, SimulatedTransport, SIMULATED_IDENTITY};
pub use transport::{block_length_prefix, frame_ieee_block, Connector, Transport};
pub use visa::VisaConnector;
#[cfg(feature = "instrument_visa")]
pub use visa::VisaTransport;
