//! Additional helpers for RPC error handling

use alloy::{primitives::U256, transports::TransportError};

/// Message geth and anvil return when the sender cannot pay for gas.
const INSUFFICIENT_FUNDS_FOR_GAS: &str = "insufficient funds for gas";

/// Message hardhat returns when the sender cannot pay for gas.
const NOT_ENOUGH_FUNDS_TO_SEND: &str = "sender doesn't have enough funds to send tx";

/// An extension trait for [`TransportError`].
pub trait TransportErrExt {
    /// Returns true if the sender of a transaction could not pay its gas and value.
    ///
    /// This is the only failure that topping up the sender can fix.
    fn is_insufficient_funds_for_gas(&self) -> bool;

    /// Returns the upfront cost the node demanded, if the error reports it.
    fn upfront_cost(&self) -> Option<U256>;
}

impl TransportErrExt for TransportError {
    fn is_insufficient_funds_for_gas(&self) -> bool {
        is_insufficient_funds_message(&error_message(self))
    }

    fn upfront_cost(&self) -> Option<U256> {
        parse_upfront_cost(&error_message(self))
    }
}

fn error_message(err: &TransportError) -> String {
    err.as_error_resp().map(|payload| payload.message.to_string()).unwrap_or_else(|| err.to_string())
}

fn is_insufficient_funds_message(message: &str) -> bool {
    let message = message.to_ascii_lowercase();
    message.contains(INSUFFICIENT_FUNDS_FOR_GAS) || message.contains(NOT_ENOUGH_FUNDS_TO_SEND)
}

/// Extracts the cost from `... The max upfront cost is: N ...` (hardhat) or
/// `... have X want N` (geth).
fn parse_upfront_cost(message: &str) -> Option<U256> {
    ["max upfront cost is: ", "want "].iter().find_map(|marker| {
        let (_, rest) = message.split_once(marker)?;
        let digits: String = rest.chars().take_while(char::is_ascii_digit).collect();
        (!digits.is_empty()).then(|| digits.parse().ok()).flatten()
    })
}
