//! # Fork Harness
//!
//! Library for running end-to-end tests against forked chains.
//!
//! The harness starts one simulator per chain on demand and serves them all behind a single
//! JSON-RPC address. Tests reset the active fork between cases, switch chains the way a wallet
//! does, and fund accounts with native or token balances.

pub mod cli;
pub mod client;
pub mod config;
pub mod constants;
pub mod coordinator;
pub mod error;
pub mod faucet;
pub mod pool;
pub mod proxy;
pub mod rpc;
pub mod serde;
pub mod simulator;
pub mod spawn;
pub mod transport;
pub mod types;

#[cfg(test)]
pub(crate) mod test_utils;
