//! Tower layers over the alloy transport used by harness-side providers.

pub mod cache;
pub mod error;
pub mod trace;

pub use cache::{CacheRegistry, ReadCache, ReadCacheLayer};
pub use error::TransportErrExt;
pub use trace::TraceLayer;
