use crate::error::FundingError;
use alloy::primitives::{
    Address, U256,
    utils::{format_units, parse_units},
};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A currency that can be funded or queried.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Currency {
    /// The chain's native currency.
    Native {
        /// Display symbol, e.g. `ETH`.
        symbol: String,
        /// Decimals, 18 on every EVM chain we fork.
        decimals: u8,
    },
    /// An ERC-20 token.
    Token {
        /// Token contract.
        address: Address,
        /// Display symbol.
        symbol: String,
        /// Token decimals.
        decimals: u8,
    },
}

impl Currency {
    /// The native currency of an EVM chain.
    pub fn native(symbol: impl Into<String>) -> Self {
        Self::Native { symbol: symbol.into(), decimals: 18 }
    }

    /// An ERC-20 token.
    pub fn token(address: Address, symbol: impl Into<String>, decimals: u8) -> Self {
        Self::Token { address, symbol: symbol.into(), decimals }
    }

    /// The currency symbol.
    pub fn symbol(&self) -> &str {
        match self {
            Self::Native { symbol, .. } | Self::Token { symbol, .. } => symbol,
        }
    }

    /// The currency decimals.
    pub fn decimals(&self) -> u8 {
        match self {
            Self::Native { decimals, .. } | Self::Token { decimals, .. } => *decimals,
        }
    }

    /// The token contract, or `None` for the native currency.
    pub fn token_address(&self) -> Option<Address> {
        match self {
            Self::Native { .. } => None,
            Self::Token { address, .. } => Some(*address),
        }
    }

    /// Whether this is the native currency.
    pub fn is_native(&self) -> bool {
        matches!(self, Self::Native { .. })
    }

    /// Parses a human amount such as `"1.5"` into a [`CurrencyAmount`].
    pub fn amount(&self, value: &str) -> Result<CurrencyAmount, FundingError> {
        let raw = parse_units(value, self.decimals())
            .map_err(|_| FundingError::InvalidAmount(value.to_string()))?
            .get_absolute();
        Ok(CurrencyAmount { currency: self.clone(), raw })
    }

    /// Wraps a raw amount in base units.
    pub fn raw_amount(&self, raw: U256) -> CurrencyAmount {
        CurrencyAmount { currency: self.clone(), raw }
    }
}

/// An amount of a [`Currency`] in base units.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurrencyAmount {
    /// The currency.
    pub currency: Currency,
    /// The amount in base units.
    pub raw: U256,
}

impl CurrencyAmount {
    /// The amount formatted with the currency's decimals, without trailing zeros.
    pub fn formatted(&self) -> String {
        let formatted = format_units(self.raw, self.currency.decimals())
            .unwrap_or_else(|_| self.raw.to_string());
        match formatted.split_once('.') {
            Some((int, frac)) => {
                let frac = frac.trim_end_matches('0');
                if frac.is_empty() { int.to_string() } else { format!("{int}.{frac}") }
            }
            None => formatted,
        }
    }
}

impl fmt::Display for CurrencyAmount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.formatted(), self.currency.symbol())
    }
}
