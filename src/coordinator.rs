//! Switch/reset coordinator.
//!
//! Owns the active target the proxy routes to. A reset either re-forks the active simulator in
//! place or switches the active target to another chain's simulator, starting it if needed.
//! Resets and switches are serialized.

use crate::{
    error::HarnessError,
    pool::ChainServerPool,
    simulator::SimulatorHandle,
    transport::{CacheRegistry, ReadCache},
};
use alloy::primitives::ChainId;
use std::sync::Arc;
use tokio::sync::{Mutex, watch};
use tracing::{debug, info, instrument};

/// The simulator client requests are currently routed to.
pub type ActiveTarget = watch::Receiver<Arc<SimulatorHandle>>;

/// Whether a reset or switch is in progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordinatorState {
    /// Nothing in progress.
    Idle,
    /// Moving the active target from one chain to another, or re-forking it when equal.
    Switching {
        /// The chain active when the transition started.
        from: ChainId,
        /// The chain being moved to.
        to: ChainId,
    },
}

/// Serializes resets and switches of the active target.
#[derive(Debug)]
pub struct Coordinator {
    pool: Arc<ChainServerPool>,
    active: watch::Sender<Arc<SimulatorHandle>>,
    /// Held for the whole of a reset or switch.
    transition: Mutex<()>,
    state: parking_lot::Mutex<CoordinatorState>,
    caches: CacheRegistry,
}

impl Coordinator {
    /// Starts the default chain and makes it the active target.
    pub async fn start(pool: Arc<ChainServerPool>) -> Result<Self, HarnessError> {
        let default_chain_id = pool.config().default_chain_id;
        let handle = pool.get_or_start(default_chain_id).await?;
        info!(chain_id = default_chain_id, "active target");
        let (active, _) = watch::channel(handle);
        Ok(Self {
            pool,
            active,
            transition: Mutex::new(()),
            state: parking_lot::Mutex::new(CoordinatorState::Idle),
            caches: CacheRegistry::new(),
        })
    }

    /// The pool simulators are taken from.
    pub fn pool(&self) -> &Arc<ChainServerPool> {
        &self.pool
    }

    /// Subscribes to the active target.
    pub fn active(&self) -> ActiveTarget {
        self.active.subscribe()
    }

    /// The currently active simulator.
    pub fn active_handle(&self) -> Arc<SimulatorHandle> {
        self.active.borrow().clone()
    }

    /// The chain id of the active simulator.
    pub fn active_chain_id(&self) -> ChainId {
        self.active.borrow().chain_id()
    }

    /// Whether a reset or switch is in progress.
    pub fn state(&self) -> CoordinatorState {
        *self.state.lock()
    }

    /// Registers a client cache so it is invalidated after every reset.
    pub fn register_cache(&self, cache: &ReadCache) {
        self.caches.register(cache);
    }

    /// Resets to `chain_id`, or to the default chain when `None`.
    ///
    /// If the target is already active its simulator is re-forked in place. Otherwise the target's
    /// simulator is taken from the pool, started if needed, and made active without being
    /// re-forked. An unknown chain fails and leaves the active target untouched.
    #[instrument(skip(self))]
    pub async fn reset(&self, chain_id: Option<ChainId>) -> Result<(), HarnessError> {
        let config = self.pool.config();
        let to = chain_id.unwrap_or(config.default_chain_id);
        let Some(fork) = config.fork(to) else {
            return Err(HarnessError::UnknownChain(to));
        };

        let _transition = self.transition.lock().await;
        let from = self.active_chain_id();
        *self.state.lock() = CoordinatorState::Switching { from, to };

        let result = if from == to {
            let handle = self.active_handle();
            debug!(chain_id = to, "re-forking active simulator");
            async {
                handle.reset(fork, config.mining).await?;
                handle.wait_ready(config.server.startup_timeout).await
            }
            .await
            .map_err(HarnessError::from)
        } else {
            self.pool.get_or_start(to).await.map(|handle| {
                self.active.send_replace(handle);
            })
        };

        *self.state.lock() = CoordinatorState::Idle;

        result?;
        let invalidated = self.caches.invalidate_all();
        info!(from, to, invalidated, "reset complete");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::{ForkConfig, HarnessConfig},
        test_utils::MockLauncher,
        transport::ReadCacheLayer,
    };
    use alloy::{
        providers::{Provider, ProviderBuilder, ext::AnvilApi},
        rpc::client::ClientBuilder,
    };

    async fn coordinator() -> (Coordinator, Arc<MockLauncher>) {
        let fork = ForkConfig::new("https://rpc.example.org".parse().unwrap());
        let config = HarnessConfig::default().with_fork(1, fork.clone()).with_fork(137, fork);
        let launcher = Arc::new(MockLauncher::default());
        let pool = Arc::new(ChainServerPool::new(Arc::new(config), launcher.clone()));
        (Coordinator::start(pool).await.unwrap(), launcher)
    }

    #[tokio::test]
    async fn starts_on_default_chain() {
        let (coordinator, launcher) = coordinator().await;
        assert_eq!(coordinator.active_chain_id(), 1);
        assert_eq!(coordinator.state(), CoordinatorState::Idle);
        assert_eq!(launcher.launches(), vec![1]);
    }

    #[tokio::test]
    async fn reset_same_chain_reforks_in_place() {
        let (coordinator, launcher) = coordinator().await;
        let handle = coordinator.active_handle();
        handle.provider().anvil_mine(Some(5), None).await.unwrap();

        coordinator.reset(None).await.unwrap();

        let node = launcher.node(1).unwrap();
        assert_eq!(node.resets(), 1);
        assert!(Arc::ptr_eq(&handle, &coordinator.active_handle()));
        assert_eq!(handle.provider().get_block_number().await.unwrap(), node.fork_block());
        assert_eq!(launcher.launches(), vec![1]);
    }

    #[tokio::test]
    async fn switch_starts_target_and_moves_active() {
        let (coordinator, launcher) = coordinator().await;
        let mut active = coordinator.active();

        coordinator.reset(Some(137)).await.unwrap();
        assert!(active.has_changed().unwrap());
        assert_eq!(active.borrow_and_update().chain_id(), 137);
        assert_eq!(launcher.launches(), vec![1, 137]);

        // switching back reuses the running simulator without re-forking it
        coordinator.reset(Some(1)).await.unwrap();
        assert_eq!(coordinator.active_chain_id(), 1);
        assert_eq!(launcher.launches(), vec![1, 137]);
        assert_eq!(launcher.node(1).unwrap().resets(), 0);
    }

    #[tokio::test]
    async fn unknown_chain_leaves_active_untouched() {
        let (coordinator, _launcher) = coordinator().await;
        let err = coordinator.reset(Some(99999999)).await.unwrap_err();
        assert!(err.to_string().contains("99999999"), "{err}");
        assert_eq!(coordinator.active_chain_id(), 1);
        assert_eq!(coordinator.state(), CoordinatorState::Idle);

        coordinator.reset(Some(137)).await.unwrap();
        assert_eq!(coordinator.active_chain_id(), 137);
    }

    #[tokio::test]
    async fn failed_switch_keeps_previous_target() {
        let (coordinator, launcher) = coordinator().await;
        launcher.fail_on(137);
        let err = coordinator.reset(Some(137)).await.unwrap_err();
        assert!(matches!(err, HarnessError::SimulatorStart(_)));
        assert_eq!(coordinator.active_chain_id(), 1);

        launcher.recover(137);
        coordinator.reset(Some(137)).await.unwrap();
        assert_eq!(coordinator.active_chain_id(), 137);
    }

    #[tokio::test]
    async fn resets_invalidate_registered_caches() {
        let (coordinator, _launcher) = coordinator().await;
        let cache = ReadCache::new();
        coordinator.register_cache(&cache);

        let client = ClientBuilder::default()
            .layer(ReadCacheLayer::new(cache.clone()))
            .http(coordinator.active_handle().endpoint().clone());
        let provider = ProviderBuilder::new().connect_client(client);
        assert_eq!(provider.get_chain_id().await.unwrap(), 1);
        assert_eq!(cache.chain_id(), Some(1));

        coordinator.reset(Some(137)).await.unwrap();
        assert_eq!(cache.chain_id(), None);
    }

    #[tokio::test]
    async fn concurrent_resets_are_serialized() {
        let (coordinator, launcher) = coordinator().await;
        let (a, b) = tokio::join!(coordinator.reset(Some(137)), coordinator.reset(Some(137)));
        a.unwrap();
        b.unwrap();
        assert_eq!(coordinator.active_chain_id(), 137);
        // one switch, then one in-place re-fork
        assert_eq!(launcher.launches(), vec![1, 137]);
        assert_eq!(launcher.node(137).unwrap().resets(), 1);
    }
}
