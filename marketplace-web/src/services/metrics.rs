use marketplace_client::{AppRole, AuthState, Outcome};
use prometheus::{Encoder, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder};
use std::sync::OnceLock;

// Global registry
pub static REGISTRY: OnceLock<Registry> = OnceLock::new();

// Metrics
pub static HTTP_REQUESTS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();
pub static HTTP_REQUEST_DURATION_SECONDS: OnceLock<HistogramVec> = OnceLock::new();
pub static AUTH_OUTCOMES_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();
pub static DOCUMENT_SCANS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

pub fn init_metrics() -> Result<(), prometheus::Error> {
    if REGISTRY.get().is_some() {
        return Ok(());
    }
    let registry = Registry::new();

    let requests_total = IntCounterVec::new(
        Opts::new("http_requests_total", "Total number of HTTP requests"),
        &["method", "path", "status"],
    )?;

    let request_duration = HistogramVec::new(
        HistogramOpts::new(
            "http_request_duration_seconds",
            "HTTP request duration in seconds",
        ),
        &["method", "path", "status"],
    )?;

    let auth_outcomes = IntCounterVec::new(
        Opts::new(
            "auth_outcomes_total",
            "Page loads by the auth state they ended in",
        ),
        &["role", "outcome"],
    )?;

    let document_scans = IntCounterVec::new(
        Opts::new("document_scans_total", "Document scans by result"),
        &["kind", "result"],
    )?;

    registry.register(Box::new(requests_total.clone()))?;
    registry.register(Box::new(request_duration.clone()))?;
    registry.register(Box::new(auth_outcomes.clone()))?;
    registry.register(Box::new(document_scans.clone()))?;

    // Initialize globals; a concurrent caller that lost the race keeps the
    // winner's collectors.
    if REGISTRY.set(registry).is_err() {
        return Ok(());
    }
    let _ = HTTP_REQUESTS_TOTAL.set(requests_total);
    let _ = HTTP_REQUEST_DURATION_SECONDS.set(request_duration);
    let _ = AUTH_OUTCOMES_TOTAL.set(auth_outcomes);
    let _ = DOCUMENT_SCANS_TOTAL.set(document_scans);
    Ok(())
}

pub fn get_metrics() -> anyhow::Result<String> {
    let registry = REGISTRY
        .get()
        .ok_or_else(|| anyhow::anyhow!("metrics registry not initialized"))?;
    let mut buffer = Vec::new();
    TextEncoder::new().encode(&registry.gather(), &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}

/// Label for the state a page load settled in.
pub fn outcome_label(state: &AuthState) -> &'static str {
    match state {
        AuthState::Ready(Outcome::NoSession) => "no_session",
        AuthState::Ready(Outcome::ProfileMissing { .. }) => "profile_missing",
        AuthState::Ready(Outcome::ProfilePresent { .. }) => "profile_present",
        AuthState::Ready(Outcome::ProfileNotRequired { .. }) => "profile_not_required",
        AuthState::Error(err) => err.kind().as_str(),
        other => other.name(),
    }
}

pub fn record_auth_outcome(role: AppRole, state: &AuthState) {
    if let Some(counter) = AUTH_OUTCOMES_TOTAL.get() {
        counter
            .with_label_values(&[role.as_str(), outcome_label(state)])
            .inc();
    }
}

pub fn record_document_scan(kind: &str, result: &str) {
    if let Some(counter) = DOCUMENT_SCANS_TOTAL.get() {
        counter.with_label_values(&[kind, result]).inc();
    }
}
