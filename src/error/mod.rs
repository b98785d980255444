//! Harness error types.
use alloy::primitives::{Bytes, ChainId};
use jsonrpsee::core::RpcResult;
use thiserror::Error;

mod config;
pub use config::ConfigError;

mod funding;
pub use funding::FundingError;

mod proxy;
pub use proxy::ProxyForwardError;

mod simulator;
pub use simulator::SimulatorError;

/// The overarching error type of the harness.
#[derive(Debug, Error)]
pub enum HarnessError {
    /// Missing or invalid configuration.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// A simulator could not be started or controlled.
    #[error(transparent)]
    SimulatorStart(#[from] SimulatorError),
    /// A reset or switch targeted a chain without a fork configuration.
    #[error("unknown chain {0} ({0:#x}): no fork configured")]
    UnknownChain(ChainId),
    /// Funding an account failed.
    #[error(transparent)]
    Funding(#[from] FundingError),
    /// Forwarding to the active simulator failed.
    #[error(transparent)]
    ProxyForward(#[from] ProxyForwardError),
    /// An error occurred talking to RPC.
    #[error(transparent)]
    Rpc(#[from] alloy::transports::TransportError),
    /// A contract call failed.
    #[error(transparent)]
    Contract(#[from] alloy::contract::Error),
    /// An internal error occurred.
    #[error(transparent)]
    Internal(#[from] eyre::Error),
}

impl From<HarnessError> for jsonrpsee::types::error::ErrorObject<'static> {
    fn from(err: HarnessError) -> Self {
        match err {
            HarnessError::Config(inner) => inner.into(),
            HarnessError::SimulatorStart(inner) => inner.into(),
            HarnessError::UnknownChain(..) => {
                rpc_err(UNRECOGNIZED_CHAIN_CODE, err.to_string(), None)
            }
            HarnessError::Funding(inner) => inner.into(),
            HarnessError::ProxyForward(..)
            | HarnessError::Rpc(..)
            | HarnessError::Contract(..)
            | HarnessError::Internal(..) => {
                internal_rpc(err.to_string())
            }
        }
    }
}

/// Wallet error code for a chain the wallet does not know about (EIP-3326).
pub const UNRECOGNIZED_CHAIN_CODE: i32 = 4902;

/// A helper trait to easily convert errors into [`RpcResult`].
pub trait ToRpcResult<Ok, Err>: Sized {
    /// Converts into an [`RpcResult`].
    fn to_rpc_result(self) -> RpcResult<Ok>
    where
        Err: Into<jsonrpsee::types::error::ErrorObject<'static>>;
}

macro_rules! impl_error_helpers {
    ($err:ty) => {
        impl<Ok> ToRpcResult<Ok, $err> for Result<Ok, $err> {
            fn to_rpc_result(self) -> RpcResult<Ok> {
                self.map_err(|err| err.into())
            }
        }
    };
}

impl_error_helpers!(HarnessError);
impl_error_helpers!(ConfigError);
impl_error_helpers!(SimulatorError);
impl_error_helpers!(FundingError);

/// Constructs an invalid params JSON-RPC error.
fn invalid_params(msg: impl Into<String>) -> jsonrpsee::types::error::ErrorObject<'static> {
    rpc_err(jsonrpsee::types::error::INVALID_PARAMS_CODE, msg, None)
}

/// Constructs an internal JSON-RPC error.
fn internal_rpc(msg: impl Into<String>) -> jsonrpsee::types::error::ErrorObject<'static> {
    rpc_err(jsonrpsee::types::error::INTERNAL_ERROR_CODE, msg, None)
}

/// Constructs a JSON-RPC error with `code`, `message` and optional `data`.
fn rpc_err(
    code: i32,
    msg: impl Into<String>,
    data: Option<Bytes>,
) -> jsonrpsee::types::error::ErrorObject<'static> {
    jsonrpsee::types::error::ErrorObject::owned(code, msg.into(), data)
}
