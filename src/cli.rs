//! # Harness CLI
use crate::{
    config::{ForkConfig, HarnessConfig, MiningConfig},
    constants::DEFAULT_PROXY_PORT,
    spawn::try_spawn_with_args,
};
use alloy::primitives::ChainId;
use clap::Parser;
use eyre::OptionExt;
use std::{
    net::{IpAddr, Ipv4Addr},
    path::PathBuf,
    time::Duration,
};
use tracing::info;
use url::Url;

/// Runs forked-chain simulators behind a single JSON-RPC endpoint for end-to-end tests.
#[derive(Debug, Parser)]
#[command(author, about = "Fork harness", long_about = None)]
pub struct Args {
    /// The configuration file.
    ///
    /// If missing, a default one will be used and stored in the working directory under
    /// `harness.yaml`.
    #[arg(long, value_name = "CONFIG", env = "HARNESS_CONFIG", default_value = "harness.yaml")]
    pub config: PathBuf,
    /// The address to serve the RPC on.
    #[arg(long = "http.addr", value_name = "ADDR", default_value_t = IpAddr::V4(Ipv4Addr::LOCALHOST))]
    pub address: IpAddr,
    /// The port to serve the RPC on.
    #[arg(long = "http.port", value_name = "PORT", default_value_t = DEFAULT_PROXY_PORT)]
    pub port: u16,
    /// A chain to fork, in the format "chain_id:url".
    ///
    /// May be given multiple times. Replaces the fork source of that chain from the config file.
    #[arg(long = "fork", value_name = "CHAIN_ID:RPC_ENDPOINT", value_parser = parse_chain_url)]
    pub forks: Vec<(ChainId, Url)>,
    /// The chain active at startup and after a reset without a chain id.
    #[arg(long = "default-chain", value_name = "CHAIN_ID")]
    pub default_chain_id: Option<ChainId>,
    /// Simulators listen on this port plus their chain id.
    #[arg(long = "simulator-base-port", value_name = "PORT")]
    pub simulator_base_port: Option<u16>,
    /// How long a simulator may take to start.
    #[arg(long, value_name = "SECONDS", value_parser = parse_duration_secs)]
    pub startup_timeout: Option<Duration>,
    /// The mnemonic test accounts are derived from.
    #[arg(long, value_name = "MNEMONIC", env = "HARNESS_MNEMONIC")]
    pub mnemonic: Option<String>,
    /// The number of test accounts to derive.
    #[arg(long = "accounts", value_name = "NUM")]
    pub account_count: Option<usize>,
    /// Disables automine, so blocks are only mined on request or on an interval.
    #[arg(long = "no-automine", default_value_t = false)]
    pub no_automine: bool,
    /// Mines a block every given number of seconds.
    #[arg(long = "block-time", value_name = "SECONDS")]
    pub block_time: Option<u64>,
    /// Turns on request logging inside the simulators.
    #[arg(long = "logging", default_value_t = false)]
    pub logging_enabled: bool,
    /// The `anvil` binary to run. Defaults to the one on `PATH`.
    #[arg(long = "anvil-path", value_name = "PATH", env = "HARNESS_ANVIL_PATH")]
    pub anvil_path: Option<PathBuf>,
    /// An extra argument for every `anvil` process. May be given multiple times.
    #[arg(long = "anvil-arg", value_name = "ARG", allow_hyphen_values = true)]
    pub anvil_args: Vec<String>,
}

impl Args {
    /// Run the harness until interrupted.
    pub async fn run(self) -> eyre::Result<()> {
        let config_path = self.config.clone();
        let handle = try_spawn_with_args(self, &config_path).await?;
        info!(url = %handle.url(), "Harness ready");

        tokio::select! {
            _ = tokio::signal::ctrl_c() => info!("Received interrupt, shutting down"),
            _ = handle.server.clone().stopped() => {}
        }
        handle.close().await;

        Ok(())
    }

    /// Merges [`Args`] values into an existing [`HarnessConfig`] instance.
    ///
    /// Only values given on the command line override the file, except for the RPC address and
    /// port which are always taken from the arguments.
    pub fn merge_harness_config(&self, mut config: HarnessConfig) -> HarnessConfig {
        config = config.with_address(self.address).with_port(self.port);
        for (chain_id, url) in &self.forks {
            let fork = match config.fork(*chain_id) {
                Some(existing) => ForkConfig { url: url.clone(), ..existing.clone() },
                None => ForkConfig::new(url.clone()),
            };
            config = config.with_fork(*chain_id, fork);
        }
        if let Some(chain_id) = self.default_chain_id {
            config = config.with_default_chain_id(chain_id);
        }
        if let Some(port) = self.simulator_base_port {
            config = config.with_simulator_base_port(port);
        }
        if let Some(timeout) = self.startup_timeout {
            config = config.with_startup_timeout(timeout);
        }
        if let Some(mnemonic) = &self.mnemonic {
            config = config.with_mnemonic(mnemonic.clone());
        }
        if let Some(count) = self.account_count {
            config = config.with_account_count(count);
        }
        if self.no_automine || self.block_time.is_some() {
            let mining = config.mining;
            config = config.with_mining(MiningConfig {
                auto: !self.no_automine && mining.auto,
                interval_secs: self.block_time.or(mining.interval_secs),
            });
        }
        if self.logging_enabled {
            config = config.with_logging_enabled(true);
        }
        config
    }
}

/// Parses a string representing seconds to a [`Duration`].
fn parse_duration_secs(arg: &str) -> Result<std::time::Duration, std::num::ParseIntError> {
    let seconds = arg.parse()?;
    Ok(std::time::Duration::from_secs(seconds))
}

/// Parses a string representing a pair of chain id and a url in a format of "chain_id:url".
fn parse_chain_url(arg: &str) -> eyre::Result<(ChainId, Url)> {
    let (chain_id, url) = arg.split_once(':').ok_or_eyre("expected chain_id:url argument")?;

    Ok((chain_id.parse()?, url.parse()?))
}
