use std::sync::Arc;

use hyper::{Body, Response};
use prometheus::{Encoder, HistogramOpts, HistogramVec, IntCounterVec, Registry, TextEncoder};

#[derive(Clone)]
pub struct Metrics {
    inner: Arc<Inner>,
}

struct Inner {
    registry: Registry,
    requests_total: IntCounterVec,
    request_latency: HistogramVec,
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let requests_total = IntCounterVec::new(
            prometheus::Opts::new("twin_gateway_requests_total", "Total update requests"),
            &["route", "status"],
        )
        .expect("metric");
        let request_latency = HistogramVec::new(
            HistogramOpts::new("twin_gateway_request_latency_seconds", "Update request latency"),
            &["route"],
        )
        .expect("metric");

        registry.register(Box::new(requests_total.clone())).expect("register");
        registry
            .register(Box::new(request_latency.clone()))
            .expect("register");

        Self {
            inner: Arc::new(Inner { registry, requests_total, request_latency }),
        }
    }

    pub fn render(&self) -> Response<Body> {
        let mf = self.inner.registry.gather();
        let mut buf = Vec::new();
        if let Err(e) = TextEncoder::new().encode(&mf, &mut buf) {
            tracing::warn!(error=%e, "failed to encode metrics");
        }

        let mut resp = Response::new(Body::from(buf));
        if let Ok(v) = hyper::header::HeaderValue::from_str(TextEncoder::new().format_type()) {
            resp.headers_mut().insert(hyper::header::CONTENT_TYPE, v);
        }
        resp
    }

    pub fn inc_requests(&self, route: &'static str, status: hyper::StatusCode) {
        self.inner
            .requests_total
            .with_label_values(&[route, status.as_str()])
            .inc();
    }

    pub fn observe_latency(&self, route: &'static str, seconds: f64) {
        self.inner.request_latency.with_label_values(&[route]).observe(seconds);
    }

    #[cfg(test)]
    pub(crate) fn request_count(&self, route: &str, status: &str) -> u64 {
        self.inner.requests_total.with_label_values(&[route, status]).get()
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
