//! Chain server pool.
//!
//! Holds at most one simulator per chain id for the lifetime of the harness. Handles are started
//! lazily on first use and are only recorded once they answer with their chain id.

use crate::{
    config::HarnessConfig,
    error::{ConfigError, HarnessError, SimulatorError},
    simulator::{LaunchRequest, Launcher, SimulatorHandle},
};
use alloy::primitives::ChainId;
use std::{collections::HashMap, sync::Arc};
use tokio::sync::Mutex;
use tracing::{info, instrument, warn};

/// Lazily started simulators, one per chain.
#[derive(Debug)]
pub struct ChainServerPool {
    config: Arc<HarnessConfig>,
    launcher: Arc<dyn Launcher>,
    /// Held across a launch so two callers never start the same chain twice.
    handles: Mutex<HashMap<ChainId, Arc<SimulatorHandle>>>,
}

impl ChainServerPool {
    /// Creates an empty pool.
    pub fn new(config: Arc<HarnessConfig>, launcher: Arc<dyn Launcher>) -> Self {
        Self { config, launcher, handles: Mutex::default() }
    }

    /// The configuration the pool starts simulators with.
    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    /// Returns the ready handle for `chain_id`, starting it first if needed.
    ///
    /// A failed start leaves nothing behind, so a later call tries again from scratch.
    #[instrument(skip(self))]
    pub async fn get_or_start(&self, chain_id: ChainId) -> Result<Arc<SimulatorHandle>, HarnessError> {
        let fork = self.config.fork(chain_id).ok_or(ConfigError::MissingFork(chain_id))?.clone();
        let port = self.config.simulator_port(chain_id)?;

        let mut handles = self.handles.lock().await;
        if let Some(handle) = handles.get(&chain_id) {
            return Ok(handle.clone());
        }

        let startup_timeout = self.config.server.startup_timeout;
        let request = LaunchRequest { chain_id, port, fork, startup_timeout };
        let handle = tokio::time::timeout(startup_timeout, self.launcher.launch(request))
            .await
            .map_err(|_| SimulatorError::Timeout { chain_id, timeout: startup_timeout })??;

        if let Err(err) = self.prepare(&handle).await {
            warn!(chain_id, %err, "simulator failed to come up");
            handle.close();
            return Err(err.into());
        }

        info!(chain_id, endpoint = %handle.endpoint(), "simulator ready");
        let handle = Arc::new(handle);
        handles.insert(chain_id, handle.clone());
        Ok(handle)
    }

    async fn prepare(&self, handle: &SimulatorHandle) -> Result<(), SimulatorError> {
        handle.wait_ready(self.config.server.startup_timeout).await?;
        handle.apply_mining(self.config.mining).await?;
        if self.config.logging_enabled {
            handle.set_logging_enabled(true).await?;
        }
        Ok(())
    }

    /// Returns the handle for `chain_id` if it has been started.
    pub async fn get(&self, chain_id: ChainId) -> Option<Arc<SimulatorHandle>> {
        self.handles.lock().await.get(&chain_id).cloned()
    }

    /// Chains with a running simulator.
    pub async fn chains(&self) -> Vec<ChainId> {
        let mut chains: Vec<_> = self.handles.lock().await.keys().copied().collect();
        chains.sort_unstable();
        chains
    }

    /// Stops every simulator and empties the pool.
    pub async fn close_all(&self) {
        let handles: Vec<_> = self.handles.lock().await.drain().collect();
        for (chain_id, handle) in handles {
            if !handle.close() {
                info!(chain_id, "released unmanaged simulator");
            }
        }
    }
}
