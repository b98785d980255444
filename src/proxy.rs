//! Forwarding proxy.
//!
//! An HTTP middleware in front of the harness RPC module. Every request is forwarded unchanged to
//! whichever simulator is active when it arrives, except a single `wallet_switchEthereumChain`
//! call, which is handed to the inner RPC module and never reaches a simulator.

use crate::{
    constants::SWITCH_CHAIN_METHOD, coordinator::ActiveTarget, error::ProxyForwardError,
    simulator::SimulatorHandle,
};
use alloy::primitives::bytes::Bytes;
use futures_util::{FutureExt, TryStreamExt};
use http::{HeaderMap, HeaderValue, StatusCode, header};
use http_body::Frame;
use http_body_util::{BodyExt, Full, StreamBody};
use jsonrpsee::server::{HttpBody, HttpRequest, HttpResponse};
use std::{future::Future, pin::Pin, sync::Arc};
use tower::{Layer, Service};
use tower_http::BoxError;
use tracing::{trace, warn};

/// Headers that only apply to a single connection and must not be forwarded.
const HOP_BY_HOP: [header::HeaderName; 9] = [
    header::CONNECTION,
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
    header::HOST,
    header::CONTENT_LENGTH,
];

/// A [`tower::Layer`] that forwards requests to the active simulator.
#[derive(Debug, Clone)]
pub struct ForwardLayer {
    active: ActiveTarget,
    client: reqwest::Client,
}

impl ForwardLayer {
    /// Creates a layer forwarding to whatever `active` points at.
    pub fn new(active: ActiveTarget, client: reqwest::Client) -> Self {
        Self { active, client }
    }
}

impl<S> Layer<S> for ForwardLayer {
    type Service = ForwardService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        ForwardService { inner, active: self.active.clone(), client: self.client.clone() }
    }
}

/// Forwards requests to the active simulator, or to `inner` for a chain switch.
#[derive(Debug, Clone)]
pub struct ForwardService<S> {
    inner: S,
    active: ActiveTarget,
    client: reqwest::Client,
}

impl<S, B> Service<HttpRequest<B>> for ForwardService<S>
where
    S: Service<HttpRequest, Response = HttpResponse> + Send + Clone + 'static,
    S::Response: 'static,
    S::Error: Into<BoxError> + 'static,
    S::Future: Send + 'static,
    B: http_body::Body<Data = Bytes> + Send + 'static,
    B::Data: Send,
    B::Error: Into<BoxError>,
{
    type Response = HttpResponse;
    type Error = BoxError;
    type Future =
        Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send + 'static>>;

    #[inline]
    fn poll_ready(
        &mut self,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx).map_err(Into::into)
    }

    fn call(&mut self, req: HttpRequest<B>) -> Self::Future {
        // the inner service was driven to readiness, so hand that one to the future
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);
        // read per request so a switch applies to the next request
        let target = self.active.borrow().clone();
        let client = self.client.clone();

        async move {
            let (parts, body) = req.into_parts();
            let body = match body.collect().await {
                Ok(collected) => collected.to_bytes(),
                Err(err) => {
                    let err = ProxyForwardError::Body(Into::<BoxError>::into(err).to_string());
                    return Ok(error_response(StatusCode::BAD_REQUEST, &err));
                }
            };

            if is_switch_chain(&body) {
                trace!("intercepting chain switch");
                let req = HttpRequest::from_parts(parts, HttpBody::new(Full::new(body)));
                return inner.call(req).await.map_err(Into::into);
            }

            Ok(forward(&client, &target, parts, body).await)
        }
        .boxed()
    }
}

/// Whether the body is a single `wallet_switchEthereumChain` call.
///
/// Batches are forwarded as-is.
fn is_switch_chain(body: &[u8]) -> bool {
    #[derive(serde::Deserialize)]
    struct RpcRequest<'a> {
        #[serde(borrow)]
        method: &'a str,
    }

    serde_json::from_slice::<RpcRequest<'_>>(body)
        .is_ok_and(|request| request.method == SWITCH_CHAIN_METHOD)
}

async fn forward(
    client: &reqwest::Client,
    target: &Arc<SimulatorHandle>,
    parts: http::request::Parts,
    body: Bytes,
) -> HttpResponse {
    match try_forward(client, target, parts, body).await {
        Ok(response) => response,
        Err(err) => {
            warn!(chain_id = target.chain_id(), %err, "forwarding failed");
            error_response(StatusCode::BAD_GATEWAY, &err)
        }
    }
}

async fn try_forward(
    client: &reqwest::Client,
    target: &SimulatorHandle,
    parts: http::request::Parts,
    body: Bytes,
) -> Result<HttpResponse, ProxyForwardError> {
    let mut url = target.endpoint().clone();
    url.set_path(parts.uri.path());
    url.set_query(parts.uri.query());

    let mut headers = parts.headers;
    strip_hop_by_hop(&mut headers);

    let upstream = client
        .request(parts.method, url.clone())
        .headers(headers)
        .body(body)
        .send()
        .await
        .map_err(|source| ProxyForwardError::Unreachable { endpoint: url, source })?;

    let status = upstream.status();
    let mut headers = upstream.headers().clone();
    strip_hop_by_hop(&mut headers);

    let stream = upstream.bytes_stream().map_ok(Frame::data);
    let mut response = HttpResponse::new(HttpBody::new(StreamBody::new(stream)));
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    Ok(response)
}

fn strip_hop_by_hop(headers: &mut HeaderMap) {
    for name in &HOP_BY_HOP {
        headers.remove(name);
    }
    headers.remove("keep-alive");
}

/// A JSON-RPC error body with the given HTTP status.
fn error_response(status: StatusCode, err: &ProxyForwardError) -> HttpResponse {
    let body = Bytes::from(err.to_json_rpc_body().to_string());
    let mut response = HttpResponse::new(HttpBody::new(Full::new(body)));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
}
