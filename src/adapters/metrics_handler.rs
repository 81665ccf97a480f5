use axum::{
    extract::{MatchedPath, Request, State},
    middleware::Next,
    response::Response,
};
use prometheus::{
    CounterVec, Encoder, Histogram, HistogramOpts, HistogramVec, IntCounter, IntGauge, Opts,
    Registry, TextEncoder,
};
use std::sync::Arc;
use std::time::Instant;

pub struct MetricsCollector {
    registry: Registry,

    // Request metrics
    pub requests_total: CounterVec,
    pub request_duration: HistogramVec,

    // Chat turn metrics
    pub turns_total: CounterVec,
    pub turn_errors: CounterVec,
    pub turns_in_flight: IntGauge,
    pub stream_tokens: IntCounter,

    pub script_duration: Histogram,
}

impl MetricsCollector {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let requests_total = CounterVec::new(
            Opts::new("agentdesk_requests_total", "Total number of requests"),
            &["method", "endpoint", "status"],
        )?;
        registry.register(Box::new(requests_total.clone()))?;

        let request_duration = HistogramVec::new(
            HistogramOpts::new("agentdesk_request_duration_seconds", "Request duration in seconds"),
            &["method", "endpoint"],
        )?;
        registry.register(Box::new(request_duration.clone()))?;

        let turns_total = CounterVec::new(
            Opts::new("agentdesk_turns_total", "Chat turns started"),
            &["mode"],
        )?;
        registry.register(Box::new(turns_total.clone()))?;

        let turn_errors = CounterVec::new(
            Opts::new("agentdesk_turn_errors_total", "Chat turns that ended with an error"),
            &["mode"],
        )?;
        registry.register(Box::new(turn_errors.clone()))?;

        let turns_in_flight = IntGauge::new(
            "agentdesk_turns_in_flight",
            "Chat turns currently streaming",
        )?;
        registry.register(Box::new(turns_in_flight.clone()))?;

        let stream_tokens = IntCounter::new(
            "agentdesk_stream_tokens_total",
            "Tokens appended to assistant messages",
        )?;
        registry.register(Box::new(stream_tokens.clone()))?;

        let script_duration = Histogram::with_opts(HistogramOpts::new(
            "agentdesk_script_duration_seconds",
            "Inline agent script evaluation time",
        ))?;
        registry.register(Box::new(script_duration.clone()))?;

        Ok(Self {
            registry,
            requests_total,
            request_duration,
            turns_total,
            turn_errors,
            turns_in_flight,
            stream_tokens,
            script_duration,
        })
    }

    pub fn encode(&self) -> anyhow::Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}

pub struct MetricsHandler {
    collector: Arc<MetricsCollector>,
}

impl MetricsHandler {
    pub fn new(collector: Arc<MetricsCollector>) -> Self {
        Self { collector }
    }

    pub async fn metrics(&self) -> String {
        self.collector.encode().unwrap_or_else(|e| {
            tracing::error!("Failed to encode metrics: {}", e);
            String::from("# Error encoding metrics\n")
        })
    }
}

/// Counts requests by route template and status
pub async fn track_requests(
    State(metrics): State<Arc<MetricsCollector>>,
    request: Request,
    next: Next,
) -> Response {
    let method = request.method().to_string();
    let endpoint = request
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string());
    let start = Instant::now();

    let response = next.run(request).await;

    metrics
        .requests_total
        .with_label_values(&[&method, &endpoint, response.status().as_str()])
        .inc();
    metrics
        .request_duration
        .with_label_values(&[&method, &endpoint])
        .observe(start.elapsed().as_secs_f64());
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_encoding() {
        let collector = MetricsCollector::new().unwrap();

        collector.requests_total.with_label_values(&["GET", "/api/catalog", "200"]).inc();
        collector.turns_total.with_label_values(&["code"]).inc();
        collector.stream_tokens.inc_by(3);

        let text = collector.encode().unwrap();
        assert!(text.contains("agentdesk_requests_total"));
        assert!(text.contains("agentdesk_turns_total"));
        assert!(text.contains("agentdesk_stream_tokens_total 3"));
    }

    #[tokio::test]
    async fn test_metrics_handler() {
        let collector = Arc::new(MetricsCollector::new().unwrap());
        let handler = MetricsHandler::new(collector.clone());

        collector.script_duration.observe(0.25);

        let metrics = handler.metrics().await;
        assert!(metrics.contains("agentdesk_script_duration_seconds"));
    }
}
