use url::Url;

/// Errors while forwarding a client request to the active simulator.
#[derive(Debug, thiserror::Error)]
pub enum ProxyForwardError {
    /// The simulator could not be reached.
    #[error("simulator at {endpoint} is unreachable: {source}")]
    Unreachable {
        /// The endpoint the request was sent to.
        endpoint: Url,
        /// The underlying HTTP error.
        #[source]
        source: reqwest::Error,
    },
    /// The request body could not be read.
    #[error("could not read request body: {0}")]
    Body(String),
}

impl ProxyForwardError {
    /// The JSON-RPC error body returned to the client alongside a `502 Bad Gateway`.
    pub fn to_json_rpc_body(&self) -> serde_json::Value {
        serde_json::json!({
            "jsonrpc": "2.0",
            "id": null,
            "error": {
                "code": jsonrpsee::types::error::INTERNAL_ERROR_CODE,
                "message": self.to_string(),
            }
        })
    }
}
