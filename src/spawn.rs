//! Harness spawn utilities.
use crate::{
    cli::Args,
    client::HarnessClient,
    config::HarnessConfig,
    constants::{ACCOUNT_COUNT_WARN_THRESHOLD, PROXY_CONNECT_TIMEOUT},
    coordinator::Coordinator,
    error::{ConfigError, HarnessError},
    faucet::{DonorLocks, Faucet},
    pool::ChainServerPool,
    proxy::ForwardLayer,
    rpc::{SwitchChain, SwitchChainApiServer},
    simulator::{AnvilLauncher, Launcher},
    types::{AccountRecord, derive_accounts},
};
use alloy::primitives::ChainId;
use http::header;
use itertools::Itertools;
use jsonrpsee::server::{Server, ServerConfig, ServerHandle};
use std::{
    net::SocketAddr,
    path::Path,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};
use tower::ServiceBuilder;
use tower_http::cors::{AllowMethods, AllowOrigin, CorsLayer};
use tracing::{debug, info, warn};
use url::Url;

/// Context returned once the harness is launched.
#[derive(Debug, Clone)]
pub struct HarnessHandle {
    /// The socket address the proxy is bound to.
    pub local_addr: SocketAddr,
    /// Handle to the proxy server.
    pub server: ServerHandle,
    /// The chain that was active at startup.
    pub chain_id: ChainId,
    /// The test accounts, fixed for the whole run.
    pub accounts: Arc<[AccountRecord]>,
    url: Url,
    coordinator: Arc<Coordinator>,
    donor_locks: DonorLocks,
    closed: Arc<AtomicBool>,
}

impl HarnessHandle {
    /// The JSON-RPC address clients connect to. It does not change across resets and switches.
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// The coordinator owning the active target.
    pub fn coordinator(&self) -> &Arc<Coordinator> {
        &self.coordinator
    }

    /// The chain requests are currently routed to.
    pub fn active_chain_id(&self) -> ChainId {
        self.coordinator.active_chain_id()
    }

    /// Resets to `chain_id`, or to the default chain when `None`.
    ///
    /// See [`Coordinator::reset`].
    pub async fn reset(&self, chain_id: Option<ChainId>) -> Result<(), HarnessError> {
        self.coordinator.reset(chain_id).await
    }

    /// A client acting as the account at `index`.
    ///
    /// Its read cache is invalidated after every reset.
    pub fn client(&self, index: usize) -> Result<HarnessClient, HarnessError> {
        let account = self.accounts.get(index).cloned().ok_or_else(|| {
            ConfigError::InvalidAccounts(format!(
                "no account at index {index}, {} configured",
                self.accounts.len()
            ))
        })?;
        let client = HarnessClient::new(self.url.clone(), account)?;
        self.coordinator.register_cache(client.cache());
        Ok(client)
    }

    /// A client for every account, in derivation order.
    pub fn clients(&self) -> Result<Vec<HarnessClient>, HarnessError> {
        (0..self.accounts.len()).map(|index| self.client(index)).collect()
    }

    /// A faucet for the active simulator.
    ///
    /// Donor locks are shared between all faucets of this harness.
    pub fn faucet(&self) -> Faucet {
        Faucet::new(self.coordinator.active_handle().provider().clone())
            .with_donor_locks(self.donor_locks.clone())
    }

    /// Stops the proxy and every simulator started during the run.
    ///
    /// Calling it again is a no-op.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            debug!("harness already closed");
            return;
        }
        if self.server.stop().is_ok() {
            self.server.clone().stopped().await;
        }
        self.coordinator.pool().close_all().await;
        info!(addr = %self.local_addr, "Stopped harness");
    }
}

/// Attempts to spawn the harness using CLI arguments and a configuration file.
///
/// If the file does not exist, the defaults merged with `args` are written to it.
pub async fn try_spawn_with_args<P: AsRef<Path>>(
    args: Args,
    config_path: P,
) -> eyre::Result<HarnessHandle> {
    let config = if !config_path.as_ref().exists() {
        let config = args.merge_harness_config(HarnessConfig::default());
        config.save_to_file(&config_path)?;
        config
    } else {
        // File exists: load and override with CLI values.
        args.merge_harness_config(HarnessConfig::load_from_file(&config_path)?)
    };

    let mut launcher = AnvilLauncher::default().with_args(args.anvil_args.iter().cloned());
    if let Some(path) = &args.anvil_path {
        launcher = launcher.with_binary(path);
    }

    Ok(try_spawn_with_launcher(config, Arc::new(launcher)).await?)
}

/// Spawns the harness with `anvil` simulators.
pub async fn try_spawn(config: HarnessConfig) -> Result<HarnessHandle, HarnessError> {
    try_spawn_with_launcher(config, Arc::new(AnvilLauncher::default())).await
}

/// Spawns the harness, starting simulators through `launcher`.
///
/// Fails before anything is started if the configuration is invalid. Otherwise the default
/// chain's simulator is started while the accounts are derived, and the proxy is bound once both
/// are done.
pub async fn try_spawn_with_launcher(
    config: HarnessConfig,
    launcher: Arc<dyn Launcher>,
) -> Result<HarnessHandle, HarnessError> {
    config.validate()?;
    if config.accounts.count > ACCOUNT_COUNT_WARN_THRESHOLD {
        warn!(
            count = config.accounts.count,
            "Deriving more than {ACCOUNT_COUNT_WARN_THRESHOLD} accounts slows down startup"
        );
    }

    let config = Arc::new(config);
    let pool = Arc::new(ChainServerPool::new(config.clone(), launcher));

    match spawn_with_pool(config, pool.clone()).await {
        Ok(handle) => Ok(handle),
        Err(err) => {
            pool.close_all().await;
            Err(err)
        }
    }
}

async fn spawn_with_pool(
    config: Arc<HarnessConfig>,
    pool: Arc<ChainServerPool>,
) -> Result<HarnessHandle, HarnessError> {
    let accounts = config.accounts.clone();
    let derive = async move {
        tokio::task::spawn_blocking(move || derive_accounts(&accounts.mnemonic, accounts.count))
            .await
            .map_err(|err| HarnessError::Internal(err.into()))?
            .map_err(HarnessError::from)
    };
    let (accounts, coordinator) = tokio::try_join!(derive, Coordinator::start(pool))?;
    let coordinator = Arc::new(coordinator);

    // construct rpc module
    let rpc = SwitchChain::new(coordinator.clone()).into_rpc();

    // http layers
    let cors = CorsLayer::new()
        .allow_methods(AllowMethods::any())
        .allow_origin(AllowOrigin::any())
        .allow_headers([header::CONTENT_TYPE]);
    let client = reqwest::Client::builder()
        .connect_timeout(PROXY_CONNECT_TIMEOUT)
        .build()
        .map_err(|err| HarnessError::Internal(err.into()))?;
    let forward = ForwardLayer::new(coordinator.active(), client);

    // start server
    let server = Server::builder()
        .set_config(ServerConfig::builder().http_only().build())
        .set_http_middleware(ServiceBuilder::new().layer(cors).layer(forward))
        .build((config.server.address, config.server.port))
        .await
        .map_err(|err| HarnessError::Internal(err.into()))?;
    let local_addr = server.local_addr().map_err(|err| HarnessError::Internal(err.into()))?;
    let url = Url::parse(&format!("http://{local_addr}"))
        .map_err(|err| HarnessError::Internal(err.into()))?;

    let chain_id = coordinator.active_chain_id();
    info!(%local_addr, chain_id, "Started harness");
    info!("Test accounts: {}", accounts.iter().map(|account| account.address).join(", "));

    Ok(HarnessHandle {
        local_addr,
        server: server.start(rpc),
        chain_id,
        accounts: accounts.into(),
        url,
        coordinator,
        donor_locks: DonorLocks::default(),
        closed: Arc::default(),
    })
}
