use super::internal_rpc;
use alloy::{primitives::Address, transports::TransportError};

/// Errors returned by [`Faucet`](crate::faucet::Faucet).
#[derive(Debug, thiserror::Error)]
pub enum FundingError {
    /// Every donor was tried and none could cover the transfer.
    #[error(
        "Could not fund {amount} {symbol} at block {block_number}: no donor has enough balance. \
         Add a donor that holds {symbol} at this block."
    )]
    InsufficientDonorFunds {
        /// The requested amount, formatted with the currency's decimals.
        amount: String,
        /// The currency symbol.
        symbol: String,
        /// The block height the donors were checked at.
        block_number: u64,
    },
    /// A token transfer was mined but reverted.
    #[error("transfer from donor {donor} reverted in {tx_hash}")]
    Reverted {
        /// The donor account.
        donor: Address,
        /// The failed transaction.
        tx_hash: alloy::primitives::TxHash,
    },
    /// The amount could not be parsed for the currency.
    #[error("invalid amount {0:?}")]
    InvalidAmount(String),
    /// A request to the simulator failed.
    #[error(transparent)]
    Rpc(#[from] TransportError),
    /// Token metadata could not be read.
    #[error(transparent)]
    Contract(#[from] alloy::contract::Error),
}

impl From<FundingError> for jsonrpsee::types::error::ErrorObject<'static> {
    fn from(err: FundingError) -> Self {
        internal_rpc(err.to_string())
    }
}
