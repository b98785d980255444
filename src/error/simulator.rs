use super::internal_rpc;
use alloy::{primitives::ChainId, transports::TransportError};
use std::time::Duration;

/// Errors raised while bringing up or controlling a simulator.
#[derive(Debug, thiserror::Error)]
pub enum SimulatorError {
    /// The simulator process could not be spawned.
    #[error("failed to start simulator for chain {chain_id}: {reason}")]
    Spawn {
        /// The chain being started.
        chain_id: ChainId,
        /// What went wrong.
        reason: String,
    },
    /// The simulator did not become ready in time.
    #[error("simulator for chain {chain_id} not ready after {timeout:?}")]
    Timeout {
        /// The chain being started.
        chain_id: ChainId,
        /// The configured startup timeout.
        timeout: Duration,
    },
    /// The simulator answered with a different chain id than it was started with.
    #[error("simulator reports chain {actual}, expected {expected}")]
    ChainIdMismatch {
        /// The chain id the simulator was launched for.
        expected: ChainId,
        /// The chain id it reports.
        actual: ChainId,
    },
    /// A control request to the simulator failed.
    #[error(transparent)]
    Rpc(#[from] TransportError),
}

impl From<SimulatorError> for jsonrpsee::types::error::ErrorObject<'static> {
    fn from(err: SimulatorError) -> Self {
        internal_rpc(err.to_string())
    }
}
