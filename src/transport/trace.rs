use alloy::{
    rpc::json_rpc::{RequestPacket, ResponsePacket},
    transports::{TransportError, TransportFut},
};
use futures_util::FutureExt;
use std::sync::Arc;
use tower::{Layer, Service};
use tracing::{Instrument, Level, field, span};

/// A layer that wraps each JSON-RPC call in a span named after the peer it talks to.
#[derive(Debug, Clone)]
pub struct TraceLayer {
    peer: Arc<str>,
}

impl TraceLayer {
    /// Creates a new `TraceLayer` for calls to `peer`.
    pub fn new(peer: impl Into<Arc<str>>) -> Self {
        Self { peer: peer.into() }
    }
}

impl<S> Layer<S> for TraceLayer {
    type Service = TraceTransport<S>;

    fn layer(&self, inner: S) -> Self::Service {
        TraceTransport { inner, peer: self.peer.clone() }
    }
}

/// A trace-instrumented transport.
#[derive(Debug, Clone)]
pub struct TraceTransport<S> {
    inner: S,
    peer: Arc<str>,
}

impl<S> Service<RequestPacket> for TraceTransport<S>
where
    S: Service<RequestPacket, Future = TransportFut<'static>, Error = TransportError>
        + Send
        + 'static
        + Clone,
{
    type Response = ResponsePacket;
    type Error = TransportError;
    type Future = TransportFut<'static>;

    fn poll_ready(
        &mut self,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: RequestPacket) -> Self::Future {
        let span = span!(
            Level::DEBUG,
            "call",
            rpc.peer = %self.peer,
            rpc.jsonrpc.request_id = field::Empty,
            rpc.method = field::Empty,
            rpc.batch_size = field::Empty,
        );

        match request {
            RequestPacket::Single(ref req) => {
                span.record("rpc.method", req.method());
                span.record("rpc.jsonrpc.request_id", req.id().to_string());
            }
            RequestPacket::Batch(ref reqs) => {
                span.record("rpc.batch_size", reqs.len());
            }
        }

        self.inner.call(request).instrument(span).boxed()
    }
}
