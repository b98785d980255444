use crate::error::ConfigError;
use alloy::{
    primitives::{Address, B256},
    signers::local::{MnemonicBuilder, PrivateKeySigner, coins_bip39::English},
};
use serde::{Deserialize, Serialize};

/// A test account with its private key.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountRecord {
    /// The account address.
    pub address: Address,
    /// The account's private key.
    pub private_key: B256,
}

impl std::fmt::Debug for AccountRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccountRecord").field("address", &self.address).finish_non_exhaustive()
    }
}

impl AccountRecord {
    /// Returns a local signer for the account.
    pub fn signer(&self) -> Result<PrivateKeySigner, ConfigError> {
        PrivateKeySigner::from_bytes(&self.private_key)
            .map_err(|err| ConfigError::InvalidAccounts(err.to_string()))
    }
}

impl From<&PrivateKeySigner> for AccountRecord {
    fn from(signer: &PrivateKeySigner) -> Self {
        Self { address: signer.address(), private_key: signer.to_bytes() }
    }
}

/// Derives `count` accounts from `mnemonic` at `m/44'/60'/0'/0/{i}`.
pub fn derive_accounts(mnemonic: &str, count: usize) -> Result<Vec<AccountRecord>, ConfigError> {
    let count = u32::try_from(count)
        .map_err(|_| ConfigError::InvalidAccounts(format!("cannot derive {count} accounts")))?;
    (0..count)
        .map(|index| {
            let signer = MnemonicBuilder::<English>::default()
                .phrase(mnemonic)
                .index(index)
                .and_then(|builder| builder.build())
                .map_err(|err| ConfigError::InvalidAccounts(err.to_string()))?;
            Ok(AccountRecord::from(&signer))
        })
        .collect()
}
