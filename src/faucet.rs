//! Funding engine for test accounts.
//!
//! Native balances are set directly on the simulator. Token balances are moved from donor
//! accounts known to hold the token on the forked chain, by impersonating the donor and sending a
//! plain `transfer`.

use crate::{
    constants::{DEFAULT_DONOR_TOP_UP, DEFAULT_DONORS, MAX_TOP_UP_RETRIES},
    error::FundingError,
    transport::TransportErrExt,
    types::{Currency, CurrencyAmount, IERC20},
};
use alloy::{
    primitives::{Address, TxHash, U256},
    providers::{DynProvider, Provider, ext::AnvilApi},
};
use dashmap::DashMap;
use futures_util::future::join_all;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

/// Per-donor locks. An impersonated donor's nonce is not safe for concurrent use.
pub type DonorLocks = Arc<DashMap<Address, Arc<Mutex<()>>>>;

/// Funds accounts on a simulator.
#[derive(Debug, Clone)]
pub struct Faucet {
    provider: DynProvider,
    donor_locks: DonorLocks,
}

impl Faucet {
    /// Create a new faucet funding through `provider`.
    pub fn new(provider: DynProvider) -> Self {
        Self { provider, donor_locks: DonorLocks::default() }
    }

    /// Shares donor locks with other faucets on the same simulator.
    pub fn with_donor_locks(mut self, donor_locks: DonorLocks) -> Self {
        self.donor_locks = donor_locks;
        self
    }

    /// Funds `address` with every amount, taking tokens from [`DEFAULT_DONORS`].
    pub async fn fund_with_default_donors(
        &self,
        address: Address,
        amounts: &[CurrencyAmount],
    ) -> Result<(), FundingError> {
        self.fund(address, amounts, DEFAULT_DONORS).await
    }

    /// Alias of [`fund`](Self::fund).
    pub async fn set_balance(
        &self,
        address: Address,
        amounts: &[CurrencyAmount],
        donors: &[Address],
    ) -> Result<(), FundingError> {
        self.fund(address, amounts, donors).await
    }

    /// Funds `address` with every amount. Currencies are funded concurrently.
    ///
    /// Native amounts become the absolute balance of `address`. Token amounts are transferred
    /// from the first donor in `donors` able to send them.
    ///
    /// Every currency runs to completion, so no donor is left impersonated, before the first
    /// failure is returned.
    pub async fn fund(
        &self,
        address: Address,
        amounts: &[CurrencyAmount],
        donors: &[Address],
    ) -> Result<(), FundingError> {
        join_all(amounts.iter().map(|amount| self.fund_one(address, amount, donors)))
            .await
            .into_iter()
            .collect()
    }

    async fn fund_one(
        &self,
        address: Address,
        amount: &CurrencyAmount,
        donors: &[Address],
    ) -> Result<(), FundingError> {
        match amount.currency.token_address() {
            None => self.set_native_balance(address, amount.raw).await,
            Some(token) => self.fund_token(address, token, amount, donors).await,
        }
    }

    async fn set_native_balance(&self, address: Address, balance: U256) -> Result<(), FundingError> {
        self.provider.anvil_set_balance(address, balance).await?;
        debug!(%address, %balance, "set native balance");
        Ok(())
    }

    #[instrument(skip_all, fields(%target, %token, amount = %amount))]
    async fn fund_token(
        &self,
        target: Address,
        token: Address,
        amount: &CurrencyAmount,
        donors: &[Address],
    ) -> Result<(), FundingError> {
        for donor in donors {
            let lock = self.donor_locks.entry(*donor).or_default().clone();
            let _guard = lock.lock().await;

            match self.transfer_from(*donor, target, token, amount.raw).await {
                Ok(()) => {
                    info!(%donor, "funded from donor");
                    return Ok(());
                }
                Err(err) => debug!(%donor, %err, "donor could not fund"),
            }
        }

        let block_number = self.provider.get_block_number().await?;
        Err(FundingError::InsufficientDonorFunds {
            amount: amount.formatted(),
            symbol: amount.currency.symbol().to_string(),
            block_number,
        })
    }

    /// Sends `amount` of `token` from `donor` to `target` while impersonating `donor`.
    ///
    /// Impersonation is always stopped afterwards, whether or not the transfer succeeded.
    async fn transfer_from(
        &self,
        donor: Address,
        target: Address,
        token: Address,
        amount: U256,
    ) -> Result<(), FundingError> {
        self.provider.anvil_impersonate_account(donor).await?;
        let result = self.transfer_with_top_up(donor, target, token, amount).await;
        if let Err(err) = self.provider.anvil_stop_impersonating_account(donor).await {
            warn!(%donor, %err, "failed to stop impersonating donor");
        }
        result
    }

    /// Attempts the transfer, topping up the donor's gas money and retrying at most
    /// [`MAX_TOP_UP_RETRIES`] times if that is all it lacks.
    async fn transfer_with_top_up(
        &self,
        donor: Address,
        target: Address,
        token: Address,
        amount: U256,
    ) -> Result<(), FundingError> {
        let tx =
            IERC20::new(token, &self.provider).transfer(target, amount).from(donor).into_transaction_request();

        let mut top_ups = 0;
        loop {
            match self.provider.anvil_send_impersonated_transaction(tx.clone()).await {
                Ok(tx_hash) => return self.confirm(donor, tx_hash).await,
                Err(err) if err.is_insufficient_funds_for_gas() && top_ups < MAX_TOP_UP_RETRIES => {
                    top_ups += 1;
                    let cost = err.upfront_cost().unwrap_or(DEFAULT_DONOR_TOP_UP);
                    let balance = self.provider.get_balance(donor).await?;
                    debug!(%donor, %balance, %cost, "topping up donor gas money");
                    self.set_native_balance(donor, balance.saturating_add(cost)).await?;
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    /// Fails if the transfer was mined and reverted. A transfer without a receipt yet counts as
    /// sent, since with automine off it is only mined later.
    async fn confirm(&self, donor: Address, tx_hash: TxHash) -> Result<(), FundingError> {
        match self.provider.get_transaction_receipt(tx_hash).await? {
            Some(receipt) if !receipt.status() => Err(FundingError::Reverted { donor, tx_hash }),
            _ => Ok(()),
        }
    }

    /// Reads the symbol and decimals of a token from the chain.
    pub async fn token_currency(&self, token: Address) -> Result<Currency, FundingError> {
        let erc20 = IERC20::new(token, &self.provider);
        let (symbol, decimals) = tokio::try_join!(
            async { erc20.symbol().call().await },
            async { erc20.decimals().call().await }
        )?;
        Ok(Currency::token(token, symbol, decimals))
    }
}
