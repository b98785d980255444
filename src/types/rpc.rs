use alloy::primitives::{ChainId, U64};
use serde::{Deserialize, Serialize};

/// Parameter of `wallet_switchEthereumChain` (EIP-3326).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SwitchEthereumChainParameter {
    /// The requested chain as a hex quantity.
    pub chain_id: U64,
}

impl SwitchEthereumChainParameter {
    /// Creates the parameter for a chain.
    pub fn new(chain_id: ChainId) -> Self {
        Self { chain_id: U64::from(chain_id) }
    }

    /// The requested chain id.
    pub fn chain_id(&self) -> ChainId {
        self.chain_id.to()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_chain_id() {
        let param: SwitchEthereumChainParameter =
            serde_json::from_str(r#"{"chainId":"0x89"}"#).unwrap();
        assert_eq!(param.chain_id(), 137);
        assert_eq!(
            serde_json::to_string(&SwitchEthereumChainParameter::new(1)).unwrap(),
            r#"{"chainId":"0x1"}"#
        );
    }
}
