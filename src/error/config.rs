use super::invalid_params;
use alloy::primitives::ChainId;

/// Errors in the harness configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// No fork source is configured for the chain.
    #[error("No fork configured for chainId({0})")]
    MissingFork(ChainId),
    /// The simulator port derived from the chain id does not fit in a `u16`.
    #[error("simulator port {base} + {chain_id} is out of range")]
    PortOutOfRange {
        /// The configured base port.
        base: u16,
        /// The chain the port was derived for.
        chain_id: ChainId,
    },
    /// No accounts would be derived.
    #[error("at least one account must be configured")]
    NoAccounts,
    /// The mnemonic or derivation path could not produce a key.
    #[error("invalid account derivation: {0}")]
    InvalidAccounts(String),
}

impl From<ConfigError> for jsonrpsee::types::error::ErrorObject<'static> {
    fn from(err: ConfigError) -> Self {
        invalid_params(err.to_string())
    }
}
