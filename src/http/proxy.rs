//! Reverse proxy to the user container.
//!
//! # Responsibilities
//! - Rewrite the request URI onto the user container's local address
//! - Strip hop-by-hop headers in both directions
//! - Append the client address to `X-Forwarded-For`
//! - Stream the response back without buffering
//!
//! # Design Decisions
//! - No retries; a transport failure becomes 502 and the caller moves on
//! - The inbound Host header is forwarded untouched so the user container
//!   sees the client's host, not the loopback address

use std::net::SocketAddr;
use std::str::FromStr;

use axum::{
    body::Body,
    extract::ConnectInfo,
    http::{
        header::{self, HeaderMap, HeaderName, HeaderValue},
        uri::{Authority, InvalidUri, PathAndQuery, Scheme},
        Request, StatusCode, Uri, Version,
    },
    response::{IntoResponse, Response},
};
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};

const X_FORWARDED_FOR: &str = "x-forwarded-for";

/// Headers meaningful only for a single transport-level connection.
const HOP_BY_HOP: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Forwards requests to a single local upstream.
#[derive(Debug, Clone)]
pub struct ReverseProxy {
    client: Client<HttpConnector, Body>,
    target: Authority,
}

impl ReverseProxy {
    /// Proxy to `target`, an authority such as `127.0.0.1:8080`.
    pub fn new(target: &str) -> Result<Self, InvalidUri> {
        let target = Authority::from_str(target)?;
        let client = Client::builder(TokioExecutor::new()).build(HttpConnector::new());
        Ok(Self { client, target })
    }

    /// Proxy to the user container on the loopback interface.
    pub fn local(port: u16) -> Self {
        let client = Client::builder(TokioExecutor::new()).build(HttpConnector::new());
        let target = Authority::from_maybe_shared(format!("127.0.0.1:{port}"))
            .unwrap_or_else(|_| Authority::from_static("127.0.0.1"));
        Self { client, target }
    }

    pub fn target(&self) -> &Authority {
        &self.target
    }

    /// Forward `request` and relay the upstream response.
    pub async fn serve(&self, request: Request<Body>) -> Response {
        let (mut parts, body) = request.into_parts();

        strip_hop_by_hop(&mut parts.headers);

        // HTTP/2 clients carry the host in the URI authority only.
        if !parts.headers.contains_key(header::HOST) {
            if let Some(authority) = parts.uri.authority() {
                if let Ok(host) = HeaderValue::from_str(authority.as_str()) {
                    parts.headers.insert(header::HOST, host);
                }
            }
        }

        if let Some(ConnectInfo(addr)) = parts.extensions.get::<ConnectInfo<SocketAddr>>() {
            append_forwarded_for(&mut parts.headers, addr.ip().to_string());
        }

        let mut uri_parts = parts.uri.clone().into_parts();
        uri_parts.scheme = Some(Scheme::HTTP);
        uri_parts.authority = Some(self.target.clone());
        if uri_parts.path_and_query.is_none() {
            uri_parts.path_and_query = Some(PathAndQuery::from_static("/"));
        }
        parts.uri = match Uri::from_parts(uri_parts) {
            Ok(uri) => uri,
            Err(e) => {
                tracing::warn!(error = %e, "Cannot rewrite request URI");
                return (StatusCode::BAD_REQUEST, "invalid request uri").into_response();
            }
        };
        parts.version = Version::HTTP_11;

        match self.client.request(Request::from_parts(parts, body)).await {
            Ok(response) => {
                let (mut parts, body) = response.into_parts();
                strip_hop_by_hop(&mut parts.headers);
                Response::from_parts(parts, Body::new(body))
            }
            Err(e) => {
                tracing::error!(upstream = %self.target, error = %e, "Upstream error");
                (StatusCode::BAD_GATEWAY, "Upstream request failed").into_response()
            }
        }
    }
}

/// Remove hop-by-hop headers, including any named by `Connection`.
fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let named: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|name| HeaderName::from_str(name.trim()).ok())
        .collect();

    for name in named {
        headers.remove(name);
    }
    for name in HOP_BY_HOP {
        headers.remove(name);
    }
}

fn append_forwarded_for(headers: &mut HeaderMap, client_ip: String) {
    let value = match headers.get(X_FORWARDED_FOR).and_then(|v| v.to_str().ok()) {
        Some(prior) => format!("{prior}, {client_ip}"),
        None => client_ip,
    };
    if let Ok(value) = HeaderValue::from_str(&value) {
        headers.insert(X_FORWARDED_FOR, value);
    }
}
