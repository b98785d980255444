//! Harness configuration.
use crate::{
    constants::{
        DEFAULT_ACCOUNT_COUNT, DEFAULT_CHAIN_ID, DEFAULT_MNEMONIC, DEFAULT_PROXY_PORT,
        DEFAULT_SIMULATOR_BASE_PORT, DEFAULT_STARTUP_TIMEOUT,
    },
    error::ConfigError,
};
use alloy::primitives::ChainId;
use eyre::Context;
use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    net::{IpAddr, Ipv4Addr},
    path::Path,
    time::Duration,
};
use url::Url;

/// Harness configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HarnessConfig {
    /// Proxy and simulator server configuration.
    #[serde(default)]
    pub server: ServerConfig,
    /// The chain the harness starts on and returns to on a plain reset.
    #[serde(default = "default_chain_id")]
    pub default_chain_id: ChainId,
    /// Fork sources by chain id.
    #[serde(default)]
    pub forks: BTreeMap<ChainId, ForkConfig>,
    /// Test account derivation.
    #[serde(default)]
    pub accounts: AccountsConfig,
    /// Mining mode applied to every simulator.
    #[serde(default)]
    pub mining: MiningConfig,
    /// Whether simulators log every request they serve.
    #[serde(default)]
    pub logging_enabled: bool,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            default_chain_id: DEFAULT_CHAIN_ID,
            forks: BTreeMap::new(),
            accounts: AccountsConfig::default(),
            mining: MiningConfig::default(),
            logging_enabled: false,
        }
    }
}

impl HarnessConfig {
    /// Sets the IP address the proxy listens on.
    pub fn with_address(mut self, address: IpAddr) -> Self {
        self.server.address = address;
        self
    }

    /// Sets the port the proxy listens on.
    pub fn with_port(mut self, port: u16) -> Self {
        self.server.port = port;
        self
    }

    /// Sets the base port simulators bind to.
    pub fn with_simulator_base_port(mut self, port: u16) -> Self {
        self.server.simulator_base_port = port;
        self
    }

    /// Sets how long a simulator may take to become ready.
    pub fn with_startup_timeout(mut self, timeout: Duration) -> Self {
        self.server.startup_timeout = timeout;
        self
    }

    /// Sets the default chain.
    pub fn with_default_chain_id(mut self, chain_id: ChainId) -> Self {
        self.default_chain_id = chain_id;
        self
    }

    /// Adds or replaces the fork source of a chain.
    pub fn with_fork(mut self, chain_id: ChainId, fork: ForkConfig) -> Self {
        self.forks.insert(chain_id, fork);
        self
    }

    /// Sets the mnemonic test accounts are derived from.
    pub fn with_mnemonic(mut self, mnemonic: impl Into<String>) -> Self {
        self.accounts.mnemonic = mnemonic.into();
        self
    }

    /// Sets the number of derived test accounts.
    pub fn with_account_count(mut self, count: usize) -> Self {
        self.accounts.count = count;
        self
    }

    /// Sets the mining mode.
    pub fn with_mining(mut self, mining: MiningConfig) -> Self {
        self.mining = mining;
        self
    }

    /// Enables or disables simulator-side request logging.
    pub fn with_logging_enabled(mut self, enabled: bool) -> Self {
        self.logging_enabled = enabled;
        self
    }

    /// Returns the fork source of a chain, if configured.
    pub fn fork(&self, chain_id: ChainId) -> Option<&ForkConfig> {
        self.forks.get(&chain_id)
    }

    /// Returns the port the simulator for `chain_id` binds to.
    pub fn simulator_port(&self, chain_id: ChainId) -> Result<u16, ConfigError> {
        let base = self.server.simulator_base_port;
        u16::try_from(chain_id)
            .ok()
            .and_then(|offset| base.checked_add(offset))
            .ok_or(ConfigError::PortOutOfRange { base, chain_id })
    }

    /// Checks the configuration before anything is started.
    ///
    /// Fails if the default chain has no fork source, if a configured chain would get a port
    /// outside the `u16` range, or if no accounts would be derived.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.fork(self.default_chain_id).is_none() {
            return Err(ConfigError::MissingFork(self.default_chain_id));
        }
        for chain_id in self.forks.keys() {
            self.simulator_port(*chain_id)?;
        }
        if self.accounts.count == 0 {
            return Err(ConfigError::NoAccounts);
        }
        Ok(())
    }

    /// Load from a YAML file.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> eyre::Result<Self> {
        let path = path.as_ref();
        let file = std::fs::File::open(path)
            .wrap_err_with(|| format!("failed to read config file: {}", path.display()))?;
        let config = serde_yaml::from_reader(&file)
            .wrap_err_with(|| format!("failed to parse config file: {}", path.display()))?;
        Ok(config)
    }

    /// Save to a YAML file.
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> eyre::Result<()> {
        let content = serde_yaml::to_string(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

fn default_chain_id() -> ChainId {
    DEFAULT_CHAIN_ID
}

/// Server configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// The address the proxy listens on.
    pub address: IpAddr,
    /// The port the proxy listens on.
    pub port: u16,
    /// Simulators bind to `simulator_base_port + chain_id`.
    pub simulator_base_port: u16,
    /// How long a simulator may take to spawn and answer `eth_chainId`.
    #[serde(with = "crate::serde::duration")]
    pub startup_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: DEFAULT_PROXY_PORT,
            simulator_base_port: DEFAULT_SIMULATOR_BASE_PORT,
            startup_timeout: DEFAULT_STARTUP_TIMEOUT,
        }
    }
}

/// Where a chain is forked from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForkConfig {
    /// Upstream JSON-RPC endpoint.
    pub url: Url,
    /// Block to pin the fork to. Latest if unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_number: Option<u64>,
    /// Extra headers sent to the upstream endpoint.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub http_headers: BTreeMap<String, String>,
}

impl ForkConfig {
    /// Creates a fork source tracking the latest block of `url`.
    pub fn new(url: Url) -> Self {
        Self { url, block_number: None, http_headers: BTreeMap::new() }
    }

    /// Pins the fork to a block.
    pub fn with_block_number(mut self, block_number: u64) -> Self {
        self.block_number = Some(block_number);
        self
    }

    /// Adds an upstream header.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.http_headers.insert(name.into(), value.into());
        self
    }
}

/// Test account derivation settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountsConfig {
    /// BIP-39 mnemonic.
    pub mnemonic: String,
    /// Number of accounts derived at `m/44'/60'/0'/0/{i}`.
    pub count: usize,
}

impl Default for AccountsConfig {
    fn default() -> Self {
        Self { mnemonic: DEFAULT_MNEMONIC.to_string(), count: DEFAULT_ACCOUNT_COUNT }
    }
}

/// Mining mode of the simulators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MiningConfig {
    /// Mine a block for every transaction.
    pub auto: bool,
    /// Additionally mine a block every `interval_secs` seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval_secs: Option<u64>,
}

impl Default for MiningConfig {
    fn default() -> Self {
        Self { auto: true, interval_secs: None }
    }
}

impl MiningConfig {
    /// The interval mining period, if any.
    pub fn interval(&self) -> Option<Duration> {
        self.interval_secs.filter(|secs| *secs > 0).map(Duration::from_secs)
    }
}
