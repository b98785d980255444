//! Serde helpers for config types.

pub mod duration;
