//! Per-account client for tests.
//!
//! Each [`HarnessClient`] signs as one [`AccountRecord`] and talks to the harness through a
//! [`ReadCache`]. After a reset the chain may have rewound or changed, so the cache has to be
//! invalidated before the client is trusted again. [`HarnessHandle`](crate::spawn::HarnessHandle)
//! registers every client it hands out so this happens automatically, and
//! [`HarnessClient::invalidate`] does it by hand.

use crate::{
    error::HarnessError,
    transport::{ReadCache, ReadCacheLayer, TraceLayer},
    types::{AccountRecord, Currency, CurrencyAmount, IERC20},
};
use alloy::{
    network::{EthereumWallet, TransactionBuilder},
    primitives::{Address, ChainId, TxHash, U256},
    providers::{DynProvider, Provider, ProviderBuilder, ext::AnvilApi},
    rpc::{client::ClientBuilder, types::TransactionRequest},
    signers::local::PrivateKeySigner,
};
use futures_util::future::try_join_all;
use std::{borrow::Cow, fmt};
use url::Url;

/// A client acting as one test account.
#[derive(Clone)]
pub struct HarnessClient {
    account: AccountRecord,
    signer: PrivateKeySigner,
    provider: DynProvider,
    cache: ReadCache,
}

impl fmt::Debug for HarnessClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HarnessClient").field("account", &self.account.address).finish()
    }
}

impl HarnessClient {
    /// Creates a client for `account` talking to `url`.
    pub fn new(url: Url, account: AccountRecord) -> Result<Self, HarnessError> {
        let signer = account.signer()?;
        let cache = ReadCache::new();
        let client = ClientBuilder::default()
            .layer(TraceLayer::new(format!("client-{}", account.address)))
            .layer(ReadCacheLayer::new(cache.clone()))
            .http(url);
        let provider = ProviderBuilder::new()
            .wallet(EthereumWallet::from(signer.clone()))
            .connect_client(client)
            .erased();
        Ok(Self { account, signer, provider, cache })
    }

    /// The accounts this client controls, which is exactly its own.
    pub fn list_accounts(&self) -> Vec<Address> {
        vec![self.account.address]
    }

    /// The account this client acts as.
    pub fn account(&self) -> &AccountRecord {
        &self.account
    }

    /// The address this client acts as.
    pub fn address(&self) -> Address {
        self.account.address
    }

    /// The signer of the account.
    pub fn signer(&self) -> &PrivateKeySigner {
        &self.signer
    }

    /// The underlying provider.
    ///
    /// Its chain-id filler memoizes the first chain id it sees, so transactions should go through
    /// [`send_transaction`](Self::send_transaction), which sets the chain id explicitly.
    pub fn provider(&self) -> &DynProvider {
        &self.provider
    }

    /// The client's read cache.
    pub fn cache(&self) -> &ReadCache {
        &self.cache
    }

    /// Sends an arbitrary JSON-RPC request.
    pub async fn send(
        &self,
        method: impl Into<Cow<'static, str>>,
        params: serde_json::Value,
    ) -> Result<serde_json::Value, HarnessError> {
        Ok(self.provider.raw_request(method.into(), params).await?)
    }

    /// The chain id, answered from the cache until it is invalidated.
    pub async fn get_network(&self) -> Result<ChainId, HarnessError> {
        Ok(self.provider.get_chain_id().await?)
    }

    /// The current block number. Never lower than a previous answer until invalidated.
    pub async fn get_block_number(&self) -> Result<u64, HarnessError> {
        Ok(self.provider.get_block_number().await?)
    }

    /// The balance of `address` in `currency`, in base units.
    pub async fn get_balance(
        &self,
        address: Address,
        currency: &Currency,
    ) -> Result<U256, HarnessError> {
        match currency.token_address() {
            None => Ok(self.provider.get_balance(address).await?),
            Some(token) => Ok(IERC20::new(token, &self.provider).balanceOf(address).call().await?),
        }
    }

    /// The balances of `address` in each of `currencies`.
    pub async fn get_balances(
        &self,
        address: Address,
        currencies: &[Currency],
    ) -> Result<Vec<CurrencyAmount>, HarnessError> {
        try_join_all(currencies.iter().map(|currency| async move {
            let raw = self.get_balance(address, currency).await?;
            Ok::<_, HarnessError>(currency.raw_amount(raw))
        }))
        .await
    }

    /// Mines `blocks` blocks.
    pub async fn mine(&self, blocks: u64) -> Result<(), HarnessError> {
        Ok(self.provider.anvil_mine(Some(blocks), None).await?)
    }

    /// Signs and sends a transaction from this account.
    ///
    /// The chain id is taken from [`get_network`](Self::get_network), so transactions sent after
    /// a switch are signed for the new chain.
    pub async fn send_transaction(&self, mut tx: TransactionRequest) -> Result<TxHash, HarnessError> {
        let chain_id = self.get_network().await?;
        tx.set_chain_id(chain_id);
        tx.set_from(self.account.address);
        let pending = self.provider.send_transaction(tx).await?;
        Ok(*pending.tx_hash())
    }

    /// Forgets the cached chain id and block number.
    pub fn invalidate(&self) {
        self.cache.invalidate();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{constants::DEFAULT_MNEMONIC, test_utils::MockNode, types::derive_accounts};
    use alloy::primitives::address;

    async fn client(node: &MockNode) -> HarnessClient {
        let account = derive_accounts(DEFAULT_MNEMONIC, 1).unwrap().remove(0);
        HarnessClient::new(node.url(), account).unwrap()
    }

    #[tokio::test]
    async fn lists_only_its_account() {
        let node = MockNode::spawn(1).await;
        let client = client(&node).await;
        assert_eq!(client.list_accounts(), vec![client.signer().address()]);
        assert_eq!(client.address(), address!("0xf39fd6e51aad88f6f4ce6ab8827279cfffb92266"));
    }

    #[tokio::test]
    async fn block_number_rewinds_only_after_invalidate() {
        let node = MockNode::spawn(1).await;
        let client = client(&node).await;

        client.mine(5).await.unwrap();
        assert_eq!(client.get_block_number().await.unwrap(), node.fork_block() + 5);

        client.send("anvil_reset", serde_json::json!([])).await.unwrap();
        assert_eq!(client.get_block_number().await.unwrap(), node.fork_block() + 5);

        client.invalidate();
        assert_eq!(client.get_block_number().await.unwrap(), node.fork_block());
        assert_eq!(client.get_network().await.unwrap(), node.chain_id());
    }

    #[tokio::test]
    async fn reads_native_and_token_balances() {
        let node = MockNode::spawn(1).await;
        let client = client(&node).await;
        let usdc = address!("0xA0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48");
        node.add_token(usdc, "USDC", 6);
        node.set_forked_balance(client.address(), U256::from(7));
        node.set_forked_token_balance(usdc, client.address(), U256::from(1_000_000));

        let balances = client
            .get_balances(
                client.address(),
                &[Currency::native("ETH"), Currency::token(usdc, "USDC", 6)],
            )
            .await
            .unwrap();
        assert_eq!(balances[0].raw, U256::from(7));
        assert_eq!(balances[1].to_string(), "1 USDC");
    }
}
