//! Request counters and latency histograms around service calls.
//!
//! [`Instrumented`] wraps any [`ObserveService`] or [`Publisher`] and
//! records one count and one latency observation per call, labelled with
//! the method name. Results pass through untouched, so wrappers stack.

use std::time::Instant;

use edgegate_bus::{BusError, Publisher};
use edgegate_protocol::Message;
use prometheus::{exponential_buckets, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry};

use crate::observe::{ObserveService, Observer};
use crate::GatewayError;

/// Counter and histogram families, registered on a caller-owned registry.
#[derive(Clone)]
pub struct Metrics {
    requests: IntCounterVec,
    latency: HistogramVec,
}

impl Metrics {
    /// Creates the metric families and registers them on `registry`.
    ///
    /// # Errors
    /// Fails if the families are already registered there.
    pub fn new(registry: &Registry) -> Result<Self, prometheus::Error> {
        let requests = IntCounterVec::new(
            Opts::new("edgegate_requests_total", "Number of requests received"),
            &["method"],
        )?;
        let latency = HistogramVec::new(
            HistogramOpts::new(
                "edgegate_request_latency_seconds",
                "Total duration of requests in seconds",
            )
            .buckets(exponential_buckets(0.0001, 2.0, 16)?),
            &["method"],
        )?;
        registry.register(Box::new(requests.clone()))?;
        registry.register(Box::new(latency.clone()))?;
        Ok(Self { requests, latency })
    }

    fn record(&self, method: &str, started: Instant) {
        self.requests.with_label_values(&[method]).inc();
        self.latency
            .with_label_values(&[method])
            .observe(started.elapsed().as_secs_f64());
    }

    /// Requests counted so far for `method`.
    pub fn requests(&self, method: &str) -> u64 {
        self.requests.with_label_values(&[method]).get()
    }

    /// Latency observations so far for `method`.
    pub fn observations(&self, method: &str) -> u64 {
        self.latency.with_label_values(&[method]).get_sample_count()
    }
}

/// A service wrapped with [`Metrics`].
pub struct Instrumented<S> {
    inner: S,
    metrics: Metrics,
}

impl<S> Instrumented<S> {
    pub fn new(inner: S, metrics: Metrics) -> Self {
        Self { inner, metrics }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }
}

impl<S: ObserveService> ObserveService for Instrumented<S> {
    async fn subscribe(
        &self,
        key: &str,
        channel: &str,
        subtopic: &str,
        observer: Observer,
    ) -> Result<(), GatewayError> {
        let started = Instant::now();
        let result = self.inner.subscribe(key, channel, subtopic, observer).await;
        self.metrics.record("subscribe", started);
        result
    }

    async fn unsubscribe(
        &self,
        key: &str,
        channel: &str,
        subtopic: &str,
        token: &str,
    ) -> Result<(), GatewayError> {
        let started = Instant::now();
        let result = self.inner.unsubscribe(key, channel, subtopic, token).await;
        self.metrics.record("unsubscribe", started);
        result
    }
}

impl<S: Publisher> Publisher for Instrumented<S> {
    async fn publish(&self, subject: &str, message: Message) -> Result<(), BusError> {
        let started = Instant::now();
        let result = self.inner.publish(subject, message).await;
        self.metrics.record("publish", started);
        result
    }
}
