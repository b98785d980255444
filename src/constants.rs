//! Harness constants.

use alloy::primitives::{Address, U256, address};
use std::time::Duration;

/// The port the forwarding proxy listens on by default.
///
/// This is the port wallets and dapps expect a local development node on.
pub const DEFAULT_PROXY_PORT: u16 = 8545;

/// Base port for simulator processes.
///
/// Each simulator binds to `base + chain_id`, so handles for different chains never collide.
pub const DEFAULT_SIMULATOR_BASE_PORT: u16 = 8545;

/// The default chain to fork.
pub const DEFAULT_CHAIN_ID: u64 = 1;

/// The well-known development mnemonic.
pub const DEFAULT_MNEMONIC: &str = "test test test test test test test test test test test junk";

/// Number of accounts derived by default.
pub const DEFAULT_ACCOUNT_COUNT: usize = 2;

/// Above this many accounts startup noticeably slows down, so we warn.
pub const ACCOUNT_COUNT_WARN_THRESHOLD: usize = 4;

/// How long a simulator may take to come up and answer `eth_chainId`.
pub const DEFAULT_STARTUP_TIMEOUT: Duration = Duration::from_secs(60);

/// Interval between readiness probes while a simulator starts.
pub const READINESS_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// The wallet method a dapp uses to ask for a different chain.
///
/// It is the only method the proxy answers itself instead of forwarding.
pub const SWITCH_CHAIN_METHOD: &str = "wallet_switchEthereumChain";

/// How many times a donor transfer is retried after topping up the donor's gas money.
pub const MAX_TOP_UP_RETRIES: usize = 1;

/// Native amount given to a donor that lacks gas money when the simulator does not report the
/// exact upfront cost (1 ether).
pub const DEFAULT_DONOR_TOP_UP: U256 = U256::from_limbs([1_000_000_000_000_000_000, 0, 0, 0]);

/// Accounts known to hold large balances of popular tokens on Ethereum mainnet.
///
/// Consulted in order when funding token balances and no donor list is given.
pub const DEFAULT_DONORS: &[Address] = &[
    // Binance 8
    address!("0xF977814e90dA44bFA03b6295A0616a897441aceC"),
    // Binance 14
    address!("0x28C6c06298d514Db089934071355E5743bf21d60"),
    // Binance 16
    address!("0xDFd5293D8e347dFe59E90eFd55b2956a1343963d"),
    // Binance 7
    address!("0xBE0eB53F46cd790Cd13851d5EFf43D12404d33E8"),
    // Coinbase 10
    address!("0xA9D1e08C7793af67e9d92fe308d5697FB81d3E43"),
    // Arbitrum bridge gateway
    address!("0xcEe284F754E854890e311e3280b767F80797180d"),
];

/// How long the proxy waits to connect to a simulator before answering with a gateway error.
///
/// Only the connection is bounded; a forwarded request may run as long as the client waits.
pub const PROXY_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
