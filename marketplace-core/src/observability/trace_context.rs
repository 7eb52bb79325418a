//! Correlation headers for calls to the hosted backend.
//!
//! Every request the front ends make to the identity provider, the REST
//! API, object storage or the vision model goes through [`TracedRequest`].
//! It carries the W3C trace context of the current span and the id of the
//! browser request being served, so the backend's logs line up with ours.
//!
//! See: https://www.w3.org/TR/trace-context/

use opentelemetry::trace::TraceContextExt;
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::RequestBuilder;
use serde::Serialize;
use std::future::Future;
use std::time::Duration;
use tracing::Span;
use tracing_opentelemetry::OpenTelemetrySpanExt;

pub const TRACEPARENT_HEADER: &str = "traceparent";
pub const TRACESTATE_HEADER: &str = "tracestate";
pub const REQUEST_ID_HEADER: &str = "x-request-id";

tokio::task_local! {
    static REQUEST_ID: String;
}

/// Run `fut` with `request_id` as the id forwarded on backend calls.
pub async fn with_request_id<F: Future>(request_id: String, fut: F) -> F::Output {
    REQUEST_ID.scope(request_id, fut).await
}

/// Id of the browser request being served, if any.
pub fn current_request_id() -> Option<String> {
    REQUEST_ID.try_with(String::clone).ok()
}

/// Write the correlation headers for the current task and span.
///
/// `traceparent` is skipped when there is no valid OpenTelemetry span, e.g.
/// when the OTLP exporter is disabled.
pub fn inject_trace_context(headers: &mut HeaderMap) {
    if let Some(value) = current_request_id().and_then(|id| HeaderValue::from_str(&id).ok()) {
        headers.insert(REQUEST_ID_HEADER, value);
    }

    let context = Span::current().context();
    let otel_span = context.span();
    let span_context = otel_span.span_context();
    if !span_context.is_valid() {
        return;
    }

    // version-trace_id-span_id-trace_flags
    let traceparent = format!(
        "00-{}-{}-{:02x}",
        span_context.trace_id(),
        span_context.span_id(),
        span_context.trace_flags().to_u8()
    );
    if let Ok(value) = HeaderValue::from_str(&traceparent) {
        headers.insert(TRACEPARENT_HEADER, value);
    }

    let tracestate = span_context.trace_state().header();
    if let Ok(value) = HeaderValue::from_str(&tracestate) {
        if !tracestate.is_empty() {
            headers.insert(TRACESTATE_HEADER, value);
        }
    }
}

/// A reqwest builder that adds the correlation headers when sent.
pub struct TracedRequest {
    request: RequestBuilder,
}

impl TracedRequest {
    pub fn new(request: RequestBuilder) -> Self {
        Self { request }
    }

    fn map(self, f: impl FnOnce(RequestBuilder) -> RequestBuilder) -> Self {
        Self {
            request: f(self.request),
        }
    }

    pub fn header(self, key: &str, value: &str) -> Self {
        self.map(|r| r.header(key, value))
    }

    pub fn query<T: Serialize + ?Sized>(self, query: &T) -> Self {
        self.map(|r| r.query(query))
    }

    pub fn json<T: Serialize + ?Sized>(self, json: &T) -> Self {
        self.map(|r| r.json(json))
    }

    pub fn body(self, body: Vec<u8>) -> Self {
        self.map(|r| r.body(body))
    }

    pub fn bearer_auth<T: std::fmt::Display>(self, token: T) -> Self {
        self.map(|r| r.bearer_auth(token))
    }

    pub fn timeout(self, timeout: Duration) -> Self {
        self.map(|r| r.timeout(timeout))
    }

    pub async fn send(self) -> Result<reqwest::Response, reqwest::Error> {
        let mut headers = HeaderMap::new();
        inject_trace_context(&mut headers);
        self.request.headers(headers).send().await
    }
}

/// Traced request constructors for the verbs the backend clients use.
pub trait TracedClientExt {
    fn traced_get(&self, url: &str) -> TracedRequest;
    fn traced_post(&self, url: &str) -> TracedRequest;
    fn traced_patch(&self, url: &str) -> TracedRequest;
}

impl TracedClientExt for reqwest::Client {
    fn traced_get(&self, url: &str) -> TracedRequest {
        TracedRequest::new(self.get(url))
    }

    fn traced_post(&self, url: &str) -> TracedRequest {
        TracedRequest::new(self.post(url))
    }

    fn traced_patch(&self, url: &str) -> TracedRequest {
        TracedRequest::new(self.patch(url))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nothing_is_injected_outside_a_request() {
        let mut headers = HeaderMap::new();
        inject_trace_context(&mut headers);
        assert!(headers.is_empty());
    }

    #[tokio::test]
    async fn request_id_is_forwarded_inside_scope() {
        let headers = with_request_id("req-7".to_string(), async {
            let mut headers = HeaderMap::new();
            inject_trace_context(&mut headers);
            headers
        })
        .await;

        assert_eq!(headers[REQUEST_ID_HEADER], "req-7");
        assert_eq!(current_request_id(), None);
    }
}
