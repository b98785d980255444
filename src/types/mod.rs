//! Shared primitive types.
mod account;
pub use account::*;

mod currency;
pub use currency::*;

mod erc20;
pub use erc20::*;

mod rpc;
pub use rpc::*;
