//! # Harness RPC
//!
//! The only method the harness answers itself instead of forwarding to the active simulator:
//!
//! - `wallet_switchEthereumChain` ([EIP-3326][eip-3326]) resets the harness to the requested
//!   chain, so a dapp switching networks lands on a fresh fork of that chain.
//!
//! [eip-3326]: https://eips.ethereum.org/EIPS/eip-3326

use crate::{coordinator::Coordinator, error::ToRpcResult, types::SwitchEthereumChainParameter};
use jsonrpsee::{
    core::{RpcResult, async_trait},
    proc_macros::rpc,
};
use std::sync::Arc;
use tracing::info;

/// `wallet_` namespace intercepted by the proxy.
#[rpc(server, client, namespace = "wallet")]
pub trait SwitchChainApi {
    /// Switches the active simulator to the requested chain.
    ///
    /// Answers `null` once the target chain is active and ready.
    #[method(name = "switchEthereumChain")]
    async fn switch_ethereum_chain(&self, parameter: SwitchEthereumChainParameter)
    -> RpcResult<()>;
}

/// Implementation of the intercepted `wallet_` namespace.
#[derive(Debug, Clone)]
pub struct SwitchChain {
    coordinator: Arc<Coordinator>,
}

impl SwitchChain {
    /// Creates the namespace backed by `coordinator`.
    pub fn new(coordinator: Arc<Coordinator>) -> Self {
        Self { coordinator }
    }
}

#[async_trait]
impl SwitchChainApiServer for SwitchChain {
    async fn switch_ethereum_chain(
        &self,
        parameter: SwitchEthereumChainParameter,
    ) -> RpcResult<()> {
        let chain_id = parameter.chain_id();
        info!(chain_id, "wallet requested chain switch");
        self.coordinator.reset(Some(chain_id)).await.to_rpc_result()
    }
}
