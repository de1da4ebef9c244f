//! The sidecar's single HTTP entry point.
//!
//! # Responsibilities
//! - Answer platform probes locally from the readiness cell
//! - Reject requests carrying routing headers only the upstream router may set
//! - Restore the client-visible host before forwarding
//! - Admit ordinary traffic through the breaker and proxy it to the user container
//! - Emit the request lifecycle events that drive concurrency accounting
//!
//! # Design Decisions
//! - Exit events are emitted from drop guards, so a request whose future is
//!   dropped (client gone, timeout layer fired) still balances its entry event
//! - Each request waits on a child of the server-wide shutdown token; shutdown
//!   discharges every queued waiter at once

use std::sync::Arc;
use std::time::Instant;

use axum::{
    body::Body,
    extract::State,
    http::{header, HeaderMap, HeaderValue, Request, StatusCode},
    response::{IntoResponse, Response},
};
use tokio_util::sync::CancellationToken;

use crate::health::ProbeFn;
use crate::http::proxy::ReverseProxy;
use crate::http::request::request_id;
use crate::observability::metrics;
use crate::observability::reporter::{RevisionLabels, StatsReporter};
use crate::queue::{Breaker, BreakerError, EventSender, ReqEventType};

/// Header marking a platform network probe.
pub const PROBE_HEADER: &str = "k-network-probe";

/// Identity a probe must name to be answered; also the 200 body.
pub const SIDECAR_NAME: &str = "queue";

/// Routing header naming the target revision.
pub const REVISION_HEADER: &str = "knative-serving-revision";

/// Routing header naming the target revision's namespace.
pub const REVISION_NAMESPACE_HEADER: &str = "knative-serving-namespace";

/// Client-visible host carried across the internal hop.
pub const ORIGINAL_HOST_HEADER: &str = "k-original-host";

const RESERVED_HEADERS: [&str; 2] = [REVISION_HEADER, REVISION_NAMESPACE_HEADER];

/// Per-request pipeline: probe interception, header hygiene, admission, proxying.
pub struct RequestHandler {
    events: Option<EventSender>,
    breaker: Option<Arc<Breaker>>,
    proxy: Option<Arc<ReverseProxy>>,
    probe: Option<ProbeFn>,
    reporter: Option<Arc<dyn StatsReporter>>,
    labels: RevisionLabels,
    shutdown: CancellationToken,
}

impl RequestHandler {
    /// Any collaborator may be absent. Without a breaker requests bypass
    /// admission control; without a probe function probes answer 500.
    pub fn new(
        events: Option<EventSender>,
        breaker: Option<Arc<Breaker>>,
        proxy: Option<Arc<ReverseProxy>>,
        probe: Option<ProbeFn>,
    ) -> Self {
        Self {
            events,
            breaker,
            proxy,
            probe,
            reporter: None,
            labels: RevisionLabels::default(),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn with_reporter(mut self, reporter: Arc<dyn StatsReporter>, labels: RevisionLabels) -> Self {
        self.reporter = Some(reporter);
        self.labels = labels;
        self
    }

    /// Tie queued requests to a server-wide cancellation token.
    pub fn with_shutdown(mut self, shutdown: CancellationToken) -> Self {
        self.shutdown = shutdown;
        self
    }

    pub fn breaker(&self) -> Option<&Arc<Breaker>> {
        self.breaker.as_ref()
    }

    /// Handle one inbound request.
    pub async fn handle(&self, mut request: Request<Body>) -> Response {
        let start = Instant::now();

        if let Some(value) = request.headers().get(PROBE_HEADER) {
            let response = self.handle_probe(value);
            metrics::record_request("probe", response.status().as_u16(), start);
            return response;
        }

        if let Some(name) = reserved_header(request.headers()) {
            tracing::warn!(
                request_id = %request_id(&request),
                header = name,
                "Rejecting request carrying a reserved routing header"
            );
            metrics::record_request("rejected", 400, start);
            return (StatusCode::BAD_REQUEST, format!("forbidden header: {name}")).into_response();
        }

        restore_original_host(request.headers_mut());

        let _request_scope = EventScope::enter(
            self.events.as_ref(),
            ReqEventType::RequestIn,
            ReqEventType::RequestOut,
        );

        let (outcome, response) = self.admit(request).await;
        let status = response.status().as_u16();

        metrics::record_request(outcome, status, start);
        if let Some(reporter) = &self.reporter {
            reporter.report_request_count(&self.labels, status, 1);
            reporter.report_response_time(&self.labels, status, start.elapsed());
        }

        response
    }

    fn handle_probe(&self, value: &HeaderValue) -> Response {
        let value = String::from_utf8_lossy(value.as_bytes());
        if value != SIDECAR_NAME {
            tracing::warn!(value = %value, "Unexpected probe header value");
            return (
                StatusCode::BAD_REQUEST,
                format!("unexpected probe header value: {value:?}"),
            )
                .into_response();
        }

        match &self.probe {
            None => (StatusCode::INTERNAL_SERVER_ERROR, "no probe").into_response(),
            Some(probe) if probe() => (StatusCode::OK, SIDECAR_NAME).into_response(),
            Some(_) => (StatusCode::SERVICE_UNAVAILABLE, "container not ready").into_response(),
        }
    }

    async fn admit(&self, request: Request<Body>) -> (&'static str, Response) {
        let Some(proxy) = self.proxy.as_deref() else {
            tracing::error!("No upstream configured");
            return ("error", (StatusCode::INTERNAL_SERVER_ERROR, "no proxy").into_response());
        };

        let Some(breaker) = &self.breaker else {
            return ("proxied", self.proxy_to(proxy, request).await);
        };

        let cancel = self.shutdown.child_token();
        let result = breaker
            .maybe(&cancel, move || self.proxy_to(proxy, request))
            .await;
        metrics::record_breaker(breaker.pending(), breaker.in_flight(), breaker.capacity());

        match result {
            Ok(response) => ("proxied", response),
            Err(BreakerError::Overflow) => {
                tracing::debug!(pending = breaker.pending(), "Waiting room full");
                ("overflow", (StatusCode::SERVICE_UNAVAILABLE, "overload").into_response())
            }
            // A client that disconnects drops this future instead; only
            // server shutdown reaches here, with the client still connected.
            Err(BreakerError::Canceled) => {
                tracing::debug!("Queued request discharged by shutdown");
                (
                    "canceled",
                    (StatusCode::SERVICE_UNAVAILABLE, "shutting down").into_response(),
                )
            }
        }
    }

    async fn proxy_to(&self, proxy: &ReverseProxy, request: Request<Body>) -> Response {
        let _proxied_scope = EventScope::enter(
            self.events.as_ref(),
            ReqEventType::ProxiedIn,
            ReqEventType::ProxiedOut,
        );
        proxy.serve(request).await
    }
}

/// Emits an entry event now and the matching exit event on drop.
struct EventScope<'a> {
    events: Option<&'a EventSender>,
    exit: ReqEventType,
}

impl<'a> EventScope<'a> {
    fn enter(events: Option<&'a EventSender>, entry: ReqEventType, exit: ReqEventType) -> Self {
        if let Some(events) = events {
            events.emit(entry);
        }
        Self { events, exit }
    }
}

impl Drop for EventScope<'_> {
    fn drop(&mut self) {
        if let Some(events) = self.events {
            events.emit(self.exit);
        }
    }
}

fn reserved_header(headers: &HeaderMap) -> Option<&'static str> {
    RESERVED_HEADERS
        .into_iter()
        .find(|name| headers.contains_key(*name))
}

fn restore_original_host(headers: &mut HeaderMap) {
    if let Some(host) = headers.remove(ORIGINAL_HOST_HEADER) {
        headers.insert(header::HOST, host);
    }
}

/// Axum entry point delegating to the shared [`RequestHandler`].
pub async fn handle_request(
    State(handler): State<Arc<RequestHandler>>,
    request: Request<Body>,
) -> Response {
    handler.handle(request).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::{channel, BreakerParams, ReqEvent};
    use std::net::SocketAddr;
    use std::time::Duration;
    use axum::{routing::any, Router};
    use tokio::net::TcpListener;
    use tokio::sync::mpsc;

    async fn backend(app: Router) -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        addr
    }

    async fn host_echo() -> Arc<ReverseProxy> {
        let app = Router::new().fallback(any(|headers: HeaderMap| async move {
            let host = headers
                .get(header::HOST)
                .and_then(|v| v.to_str().ok())
                .unwrap_or_default()
                .to_string();
            let leaked = headers.contains_key(ORIGINAL_HOST_HEADER);
            format!("host={host} leaked={leaked}")
        }));
        let addr = backend(app).await;
        Arc::new(ReverseProxy::new(&addr.to_string()).unwrap())
    }

    fn request(headers: &[(&str, &str)]) -> Request<Body> {
        let mut builder = Request::builder().uri("/").header(header::HOST, "internal.svc");
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        builder.body(Body::empty()).unwrap()
    }

    async fn body_string(response: Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), 64 * 1024).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    fn drain(rx: &mut mpsc::Receiver<ReqEvent>) -> Vec<ReqEventType> {
        let mut seen = Vec::new();
        while let Ok(event) = rx.try_recv() {
            seen.push(event.event_type);
        }
        seen
    }

    fn breaker(max_concurrency: usize) -> Arc<Breaker> {
        Arc::new(Breaker::new(BreakerParams {
            queue_depth_factor: 1,
            max_concurrency,
            initial_capacity: max_concurrency,
        }))
    }

    #[tokio::test]
    async fn test_reserved_headers_rejected() {
        for name in RESERVED_HEADERS {
            let (events, mut rx) = channel(16);
            let breaker = breaker(1);
            let handler = RequestHandler::new(Some(events), Some(breaker.clone()), None, None);

            let response = handler.handle(request(&[(name, "spoofed")])).await;

            assert_eq!(response.status(), StatusCode::BAD_REQUEST);
            assert!(body_string(response).await.contains(name));
            assert!(drain(&mut rx).is_empty());
            assert_eq!(breaker.in_flight(), 0);
        }
    }

    #[tokio::test]
    async fn test_probe_unexpected_value() {
        let handler = RequestHandler::new(None, None, None, Some(Arc::new(|| true)));

        let response = handler.handle(request(&[(PROBE_HEADER, "activator")])).await;

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_string(response).await;
        assert_eq!(body, "unexpected probe header value: \"activator\"");
    }

    #[tokio::test]
    async fn test_probe_without_probe_function() {
        let handler = RequestHandler::new(None, None, None, None);

        let response = handler.handle(request(&[(PROBE_HEADER, SIDECAR_NAME)])).await;

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body_string(response).await, "no probe");
    }

    #[tokio::test]
    async fn test_probe_not_ready() {
        let (events, mut rx) = channel(16);
        let handler = RequestHandler::new(Some(events), None, None, Some(Arc::new(|| false)));

        let response = handler.handle(request(&[(PROBE_HEADER, SIDECAR_NAME)])).await;

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body_string(response).await, "container not ready");
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn test_probe_ready() {
        let handler = RequestHandler::new(None, None, None, Some(Arc::new(|| true)));

        let response = handler.handle(request(&[(PROBE_HEADER, SIDECAR_NAME)])).await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_string(response).await, SIDECAR_NAME);
    }

    #[tokio::test]
    async fn test_proxied_request_emits_events_in_order() {
        let (events, mut rx) = channel(16);
        let breaker = breaker(2);
        let handler = RequestHandler::new(
            Some(events),
            Some(breaker.clone()),
            Some(host_echo().await),
            None,
        );

        let response = handler.handle(request(&[])).await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            drain(&mut rx),
            vec![
                ReqEventType::RequestIn,
                ReqEventType::ProxiedIn,
                ReqEventType::ProxiedOut,
                ReqEventType::RequestOut,
            ]
        );
        assert_eq!(breaker.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_original_host_restored_and_stripped() {
        let handler = RequestHandler::new(None, None, Some(host_echo().await), None);

        let response = handler
            .handle(request(&[(ORIGINAL_HOST_HEADER, "example.com")]))
            .await;

        assert_eq!(body_string(response).await, "host=example.com leaked=false");
    }

    #[tokio::test]
    async fn test_host_untouched_without_original_host() {
        let handler = RequestHandler::new(None, None, Some(host_echo().await), None);

        let response = handler.handle(request(&[])).await;

        assert_eq!(body_string(response).await, "host=internal.svc leaked=false");
    }

    #[tokio::test]
    async fn test_bypass_without_breaker_still_proxies() {
        let (events, mut rx) = channel(16);
        let handler = RequestHandler::new(Some(events), None, Some(host_echo().await), None);

        let response = handler.handle(request(&[])).await;

        assert_eq!(response.status(), StatusCode::OK);
        let seen = drain(&mut rx);
        assert_eq!(seen.iter().filter(|e| **e == ReqEventType::ProxiedIn).count(), 1);
    }

    #[tokio::test]
    async fn test_overflow_returns_503() {
        let app = Router::new().fallback(any(|| async {
            tokio::time::sleep(Duration::from_millis(500)).await;
            "slow"
        }));
        let addr = backend(app).await;
        let proxy = Arc::new(ReverseProxy::new(&addr.to_string()).unwrap());

        // One slot and one waiting-room place.
        let breaker = breaker(1);
        let handler = Arc::new(RequestHandler::new(None, Some(breaker.clone()), Some(proxy), None));

        let mut admitted = Vec::new();
        for _ in 0..2 {
            admitted.push(tokio::spawn({
                let handler = handler.clone();
                async move { handler.handle(request(&[])).await.status() }
            }));
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        assert_eq!(breaker.in_flight(), 1);
        assert_eq!(breaker.pending(), 1);

        let response = handler.handle(request(&[])).await;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body_string(response).await, "overload");

        for handle in admitted {
            assert_eq!(handle.await.unwrap(), StatusCode::OK);
        }
    }

    #[tokio::test]
    async fn test_shutdown_cancels_queued_request() {
        let app = Router::new().fallback(any(|| async {
            tokio::time::sleep(Duration::from_millis(500)).await;
            "slow"
        }));
        let addr = backend(app).await;
        let proxy = Arc::new(ReverseProxy::new(&addr.to_string()).unwrap());
        let shutdown = CancellationToken::new();
        let breaker = Arc::new(Breaker::new(BreakerParams {
            queue_depth_factor: 2,
            max_concurrency: 1,
            initial_capacity: 1,
        }));
        let (events, mut rx) = channel(16);
        let handler = Arc::new(
            RequestHandler::new(Some(events), Some(breaker.clone()), Some(proxy), None)
                .with_shutdown(shutdown.clone()),
        );

        let running = tokio::spawn({
            let handler = handler.clone();
            async move { handler.handle(request(&[])).await.status() }
        });
        tokio::time::sleep(Duration::from_millis(100)).await;
        let queued = tokio::spawn({
            let handler = handler.clone();
            async move { handler.handle(request(&[])).await }
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(breaker.pending(), 1);

        shutdown.cancel();

        let discharged = queued.await.unwrap();
        assert_eq!(discharged.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body_string(discharged).await, "shutting down");
        assert_eq!(running.await.unwrap(), StatusCode::OK);

        let seen = drain(&mut rx);
        assert_eq!(seen.iter().filter(|e| **e == ReqEventType::ProxiedIn).count(), 1);
        assert_eq!(seen.iter().filter(|e| **e == ReqEventType::RequestOut).count(), 2);
    }

    #[tokio::test]
    async fn test_dropped_request_balances_events() {
        let app = Router::new().fallback(any(|| async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            "slow"
        }));
        let addr = backend(app).await;
        let proxy = Arc::new(ReverseProxy::new(&addr.to_string()).unwrap());
        let (events, mut rx) = channel(16);
        let breaker = breaker(1);
        let handler = RequestHandler::new(Some(events), Some(breaker.clone()), Some(proxy), None);

        let result =
            tokio::time::timeout(Duration::from_millis(100), handler.handle(request(&[]))).await;
        assert!(result.is_err());

        let mut seen = drain(&mut rx);
        assert_eq!(seen.len(), 4);
        assert_eq!(&seen[..2], &[ReqEventType::RequestIn, ReqEventType::ProxiedIn]);
        seen.drain(..2);
        assert!(seen.contains(&ReqEventType::ProxiedOut));
        assert!(seen.contains(&ReqEventType::RequestOut));
        assert_eq!(breaker.in_flight(), 0);
    }
}
