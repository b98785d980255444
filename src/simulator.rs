//! Forked-chain simulators.
//!
//! A [`SimulatorHandle`] is a live JSON-RPC endpoint serving one fork of one chain. Handles are
//! produced by a [`Launcher`]; [`AnvilLauncher`] starts an `anvil` process per chain.

use crate::{
    config::{ForkConfig, MiningConfig},
    constants::READINESS_POLL_INTERVAL,
    error::SimulatorError,
    transport::TraceLayer,
};
use alloy::{
    node_bindings::{Anvil, AnvilInstance},
    primitives::ChainId,
    providers::{DynProvider, Provider, ProviderBuilder, ext::AnvilApi},
    rpc::{client::ClientBuilder, types::anvil::Forking},
};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::{fmt, path::PathBuf, time::Duration};
use tracing::{debug, info, trace};
use url::Url;

/// A running simulator for one chain.
pub struct SimulatorHandle {
    chain_id: ChainId,
    endpoint: Url,
    provider: DynProvider,
    /// The owned process, or `None` if the node is managed elsewhere.
    process: Mutex<Option<AnvilInstance>>,
}

impl fmt::Debug for SimulatorHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SimulatorHandle")
            .field("chain_id", &self.chain_id)
            .field("endpoint", &self.endpoint.as_str())
            .field("managed", &self.is_managed())
            .finish()
    }
}

impl SimulatorHandle {
    /// Wraps a simulator listening on `endpoint`.
    ///
    /// If `process` is given the handle owns it and stops it on [`close`](Self::close) or drop.
    pub fn new(chain_id: ChainId, endpoint: Url, process: Option<AnvilInstance>) -> Self {
        let client = ClientBuilder::default()
            .layer(TraceLayer::new(format!("simulator-{chain_id}")))
            .http(endpoint.clone());
        let provider =
            ProviderBuilder::new().disable_recommended_fillers().connect_client(client).erased();
        Self { chain_id, endpoint, provider, process: Mutex::new(process) }
    }

    /// The chain this simulator forks.
    pub fn chain_id(&self) -> ChainId {
        self.chain_id
    }

    /// The JSON-RPC endpoint of the simulator.
    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// A provider talking directly to the simulator.
    pub fn provider(&self) -> &DynProvider {
        &self.provider
    }

    /// Whether this handle owns the simulator process.
    pub fn is_managed(&self) -> bool {
        self.process.lock().is_some()
    }

    /// Polls `eth_chainId` until the simulator answers with its chain id.
    pub async fn wait_ready(&self, timeout: Duration) -> Result<(), SimulatorError> {
        let chain_id = self.chain_id;
        let probe = async {
            loop {
                match self.provider.get_chain_id().await {
                    Ok(actual) if actual == chain_id => return Ok(()),
                    Ok(actual) => {
                        return Err(SimulatorError::ChainIdMismatch { expected: chain_id, actual });
                    }
                    Err(err) => {
                        trace!(chain_id, %err, "simulator not ready yet");
                        tokio::time::sleep(READINESS_POLL_INTERVAL).await;
                    }
                }
            }
        };
        tokio::time::timeout(timeout, probe)
            .await
            .map_err(|_| SimulatorError::Timeout { chain_id, timeout })?
    }

    /// Re-forks the simulator in place from `fork` and re-applies the mining mode.
    ///
    /// All local state (balances, deployed contracts, mined blocks) is discarded.
    pub async fn reset(&self, fork: &ForkConfig, mining: MiningConfig) -> Result<(), SimulatorError> {
        debug!(chain_id = self.chain_id, block_number = ?fork.block_number, "resetting simulator");
        self.provider
            .anvil_reset(Some(Forking {
                json_rpc_url: Some(fork.url.to_string()),
                block_number: fork.block_number,
            }))
            .await?;
        self.apply_mining(mining).await
    }

    /// Applies the mining mode.
    ///
    /// Interval mining, if configured, is applied after the automine flag.
    pub async fn apply_mining(&self, mining: MiningConfig) -> Result<(), SimulatorError> {
        self.provider.anvil_set_auto_mine(mining.auto).await?;
        if let Some(interval) = mining.interval() {
            self.provider.anvil_set_interval_mining(interval.as_secs()).await?;
        }
        Ok(())
    }

    /// Turns simulator-side request logging on or off.
    pub async fn set_logging_enabled(&self, enabled: bool) -> Result<(), SimulatorError> {
        self.provider
            .raw_request::<_, serde_json::Value>("anvil_setLoggingEnabled".into(), (enabled,))
            .await?;
        Ok(())
    }

    /// Stops the owned simulator process. Returns `false` if there was nothing to stop.
    pub fn close(&self) -> bool {
        let closed = self.process.lock().take().is_some();
        if closed {
            info!(chain_id = self.chain_id, endpoint = %self.endpoint, "stopped simulator");
        }
        closed
    }
}

/// What a [`Launcher`] should start.
#[derive(Debug, Clone)]
pub struct LaunchRequest {
    /// The chain to simulate.
    pub chain_id: ChainId,
    /// The port to bind.
    pub port: u16,
    /// Where to fork from.
    pub fork: ForkConfig,
    /// How long process startup may take.
    pub startup_timeout: Duration,
}

/// Starts simulators.
#[async_trait]
pub trait Launcher: Send + Sync + fmt::Debug {
    /// Starts a simulator for the request.
    ///
    /// The returned handle may not be ready yet; callers probe it with
    /// [`SimulatorHandle::wait_ready`].
    async fn launch(&self, request: LaunchRequest) -> Result<SimulatorHandle, SimulatorError>;
}

/// Launches `anvil` processes.
#[derive(Debug, Clone, Default)]
pub struct AnvilLauncher {
    binary: Option<PathBuf>,
    args: Vec<String>,
}

impl AnvilLauncher {
    /// Uses the `anvil` binary at `path` instead of the one on `PATH`.
    pub fn with_binary(mut self, path: impl Into<PathBuf>) -> Self {
        self.binary = Some(path.into());
        self
    }

    /// Passes extra arguments to every launched process.
    pub fn with_args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    fn command(&self, request: &LaunchRequest) -> Anvil {
        let mut anvil = match &self.binary {
            Some(path) => Anvil::at(path),
            None => Anvil::new(),
        }
        .port(request.port)
        .chain_id(request.chain_id)
        .fork(request.fork.url.as_str())
        .timeout(request.startup_timeout.as_millis().try_into().unwrap_or(u64::MAX));

        if let Some(block_number) = request.fork.block_number {
            anvil = anvil.fork_block_number(block_number);
        }
        for (name, value) in &request.fork.http_headers {
            anvil = anvil.args(["--fork-header".to_string(), format!("{name}: {value}")]);
        }
        anvil.args(self.args.iter().cloned())
    }
}

#[async_trait]
impl Launcher for AnvilLauncher {
    async fn launch(&self, request: LaunchRequest) -> Result<SimulatorHandle, SimulatorError> {
        let chain_id = request.chain_id;
        let anvil = self.command(&request);
        debug!(chain_id, port = request.port, fork = %request.fork.url, "spawning anvil");

        let instance = tokio::task::spawn_blocking(move || anvil.try_spawn())
            .await
            .map_err(|err| SimulatorError::Spawn { chain_id, reason: err.to_string() })?
            .map_err(|err| SimulatorError::Spawn { chain_id, reason: err.to_string() })?;

        let endpoint = instance.endpoint_url();
        info!(chain_id, %endpoint, "started simulator");
        Ok(SimulatorHandle::new(chain_id, endpoint, Some(instance)))
    }
}
