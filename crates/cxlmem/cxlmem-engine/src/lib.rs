//! The engine crate: [`context::SimulationContext`] (§9's explicit
//! replacement for the source's global `CXLController`) and
//! [`driver::EpochLoop`], the top-level control loop (§4.7) that ties every
//! other `cxlmem-*` crate together. This is the ~30% of the core the design
//! doc budgets to the epoch loop itself.

mod clock;
mod context;
mod driver;
mod epoch;
mod socket;

pub use context::{SimulationContext, DEFAULT_CAPACITY};
pub use driver::EpochLoop;
pub use epoch::{compensate, epoch_deltas, off_epoch, OffStep};
pub use socket::{ControlSocket, DrainError, SocketError};

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Topology(#[from] cxlmem_topology::TopologyError),

    #[error(transparent)]
    Monitor(#[from] cxlmem_monitor::MonitorError),

    #[error(transparent)]
    Socket(#[from] SocketError),

    /// §7's `ControlPayloadMalformed`: fatal, explicit exit.
    #[error(transparent)]
    Protocol(#[from] cxlmem_protocol::ProtocolError),
}

impl From<DrainError> for EngineError {
    fn from(e: DrainError) -> Self {
        match e {
            DrainError::Malformed(e) => EngineError::Protocol(e),
            DrainError::Socket(e) => EngineError::Socket(e),
        }
    }
}
