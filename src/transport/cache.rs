//! Client-side read cache that keeps a client consistent across resets.
//!
//! A JSON-RPC client that talks to a chain which can be rewound or swapped underneath it must
//! forget what it learned about the chain whenever that happens. [`ReadCache`] memoizes
//! `eth_chainId` and keeps `eth_blockNumber` monotonic between resets, and
//! [`ReadCache::invalidate`] drops both.

use alloy::{
    primitives::{ChainId, U64},
    rpc::json_rpc::{RequestPacket, Response, ResponsePacket, ResponsePayload},
    transports::{TransportError, TransportFut},
};
use parking_lot::Mutex;
use serde_json::value::RawValue;
use std::{
    sync::{Arc, Weak},
    task::{Context, Poll},
};
use tower::{Layer, Service};
use tracing::trace;

const ETH_CHAIN_ID: &str = "eth_chainId";
const ETH_BLOCK_NUMBER: &str = "eth_blockNumber";

#[derive(Debug, Default)]
struct CacheState {
    /// Bumped on every invalidation so answers to in-flight requests are not stored afterwards.
    generation: u64,
    chain_id: Option<ChainId>,
    max_block_number: Option<u64>,
}

/// Chain facts a client remembers until told the chain changed.
#[derive(Debug, Clone, Default)]
pub struct ReadCache {
    state: Arc<Mutex<CacheState>>,
}

impl ReadCache {
    /// Creates an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Forgets the cached chain id and block height.
    pub fn invalidate(&self) {
        let mut state = self.state.lock();
        state.generation += 1;
        state.chain_id = None;
        state.max_block_number = None;
        trace!(generation = state.generation, "invalidated read cache");
    }

    /// The cached chain id.
    pub fn chain_id(&self) -> Option<ChainId> {
        self.state.lock().chain_id
    }

    /// The highest block number observed since the last invalidation.
    pub fn block_number(&self) -> Option<u64> {
        self.state.lock().max_block_number
    }

    fn generation(&self) -> u64 {
        self.state.lock().generation
    }

    fn store_chain_id(&self, generation: u64, chain_id: ChainId) {
        let mut state = self.state.lock();
        if state.generation == generation {
            state.chain_id = Some(chain_id);
        }
    }

    /// Records an observed block number and returns the value the client should see.
    fn observe_block_number(&self, generation: u64, block_number: u64) -> u64 {
        let mut state = self.state.lock();
        if state.generation != generation {
            return block_number;
        }
        let max = state.max_block_number.map_or(block_number, |max| max.max(block_number));
        state.max_block_number = Some(max);
        max
    }

    fn downgrade(&self) -> Weak<Mutex<CacheState>> {
        Arc::downgrade(&self.state)
    }
}

/// Weak handles to every live [`ReadCache`], so all of them can be invalidated at once.
#[derive(Debug, Clone, Default)]
pub struct CacheRegistry {
    caches: Arc<Mutex<Vec<Weak<Mutex<CacheState>>>>>,
}

impl CacheRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a cache. Dropped caches are pruned on the next invalidation.
    pub fn register(&self, cache: &ReadCache) {
        self.caches.lock().push(cache.downgrade());
    }

    /// Invalidates every live cache and returns how many there were.
    pub fn invalidate_all(&self) -> usize {
        let mut caches = self.caches.lock();
        caches.retain(|weak| weak.strong_count() > 0);
        let live: Vec<_> = caches.iter().filter_map(Weak::upgrade).collect();
        drop(caches);

        for state in &live {
            ReadCache { state: state.clone() }.invalidate();
        }
        live.len()
    }
}

/// A [`tower::Layer`] that puts a [`ReadCache`] in front of a transport.
#[derive(Debug, Clone)]
pub struct ReadCacheLayer {
    cache: ReadCache,
}

impl ReadCacheLayer {
    /// Creates a new layer backed by `cache`.
    pub fn new(cache: ReadCache) -> Self {
        Self { cache }
    }
}

impl<S> Layer<S> for ReadCacheLayer {
    type Service = ReadCacheService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        ReadCacheService { inner, cache: self.cache.clone() }
    }
}

/// Transport that answers `eth_chainId` from its cache and never lets `eth_blockNumber` go
/// backwards until the cache is invalidated.
///
/// Batches are passed through untouched.
#[derive(Debug, Clone)]
pub struct ReadCacheService<S> {
    inner: S,
    cache: ReadCache,
}

impl<S> Service<RequestPacket> for ReadCacheService<S>
where
    S: Service<RequestPacket, Future = TransportFut<'static>, Error = TransportError>
        + Send
        + 'static
        + Clone,
{
    type Response = ResponsePacket;
    type Error = TransportError;
    type Future = TransportFut<'static>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: RequestPacket) -> Self::Future {
        let Some(req) = request.as_single() else { return self.inner.call(request) };
        let method = req.method().to_string();
        if method != ETH_CHAIN_ID && method != ETH_BLOCK_NUMBER {
            return self.inner.call(request);
        }

        if method == ETH_CHAIN_ID
            && let Some(chain_id) = self.cache.chain_id()
        {
            let id = req.id().clone();
            return Box::pin(async move {
                Ok(ResponsePacket::Single(Response { id, payload: quantity(chain_id)? }))
            });
        }

        let cache = self.cache.clone();
        let generation = cache.generation();
        let fut = self.inner.call(request);
        Box::pin(async move {
            let mut response = fut.await?;
            let ResponsePacket::Single(ref mut single) = response else { return Ok(response) };
            let Some(value) = single.payload.as_success().and_then(|raw| parse_quantity(raw)) else {
                return Ok(response);
            };

            if method == ETH_CHAIN_ID {
                cache.store_chain_id(generation, value);
            } else {
                let seen = cache.observe_block_number(generation, value);
                if seen != value {
                    trace!(reported = value, returned = seen, "holding block number");
                    single.payload = quantity(seen)?;
                }
            }
            Ok(response)
        })
    }
}

fn parse_quantity(raw: &RawValue) -> Option<u64> {
    serde_json::from_str::<U64>(raw.get()).ok().map(|value| value.to())
}

fn quantity(value: u64) -> Result<ResponsePayload, TransportError> {
    let raw = serde_json::value::to_raw_value(&U64::from(value))
        .map_err(TransportError::ser_err)?;
    Ok(ResponsePayload::Success(raw))
}
