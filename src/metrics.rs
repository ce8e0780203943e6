//! Metrics collection and Prometheus export (C7) — §4.7.

use metrics_exporter_prometheus::PrometheusBuilder;
use prometheus::{Encoder, TextEncoder};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use crate::error::{AuditError, Result};

/// Label set attached to a metric sample.
#[derive(Debug, Clone, Default)]
pub struct MetricLabels {
    pub labels: HashMap<String, String>,
}

impl MetricLabels {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }
}

/// Stopwatch for a histogram sample; records on drop via `stop()`.
pub struct OperationTimer<'a> {
    name: &'static str,
    collector: &'a MetricsCollector,
    start: Instant,
}

impl<'a> OperationTimer<'a> {
    pub fn stop(self) {
        let elapsed_ms = self.start.elapsed().as_secs_f64() * 1000.0;
        self.collector.record_histogram(self.name, elapsed_ms);
    }
}

/// Snapshot of the domain metrics named in §4.7: events processed, queue
/// depth, error rate, integrity violations, alerts, and suspicious patterns.
#[derive(Debug, Clone, Default)]
pub struct MetricsSnapshot {
    pub events_processed_total: u64,
    pub errors_generated_total: u64,
    pub integrity_violations_total: u64,
    pub alerts_generated_total: u64,
    pub suspicious_patterns_total: u64,
    pub queue_depth: f64,
    pub processing_latency_avg_ms: f64,
    pub error_rate: f64,
}

/// Central metrics collector: counters/gauges backed by `HashMap`s,
/// histograms sampled for `processing_latency_ms`, plus an optional
/// Prometheus exporter for scraping.
pub struct MetricsCollector {
    counters: Mutex<HashMap<&'static str, u64>>,
    gauges: Mutex<HashMap<&'static str, f64>>,
    histograms: Mutex<HashMap<&'static str, Vec<f64>>>,
}

impl MetricsCollector {
    pub fn new(enabled: bool) -> Result<Self> {
        if enabled {
            if let Err(err) = PrometheusBuilder::new().install() {
                tracing::warn!(error = %err, "failed to install prometheus recorder");
            }
        }

        Ok(Self {
            counters: Mutex::new(HashMap::new()),
            gauges: Mutex::new(HashMap::new()),
            histograms: Mutex::new(HashMap::new()),
        })
    }

    pub fn start_timer(&self, name: &'static str) -> OperationTimer<'_> {
        OperationTimer { name, collector: self, start: Instant::now() }
    }

    pub fn increment_counter(&self, name: &'static str, by: u64) {
        let mut counters = self.counters.lock().unwrap();
        *counters.entry(name).or_insert(0) += by;
    }

    pub fn set_gauge(&self, name: &'static str, value: f64) {
        self.gauges.lock().unwrap().insert(name, value);
    }

    pub fn record_histogram(&self, name: &'static str, value: f64) {
        self.histograms.lock().unwrap().entry(name).or_default().push(value);
    }

    /// Events processed, errors generated, integrity violations, alerts
    /// generated, suspicious patterns, queue depth, average processing
    /// latency, and the derived error rate (errors / events, §4.7 / §4.11).
    pub fn snapshot(&self) -> MetricsSnapshot {
        let counters = self.counters.lock().unwrap();
        let gauges = self.gauges.lock().unwrap();
        let histograms = self.histograms.lock().unwrap();

        let events = *counters.get("events_processed_total").unwrap_or(&0);
        let errors = *counters.get("errors_generated_total").unwrap_or(&0);
        let error_rate = if events > 0 { errors as f64 / events as f64 } else { 0.0 };

        let latencies = histograms.get("processing_latency_ms");
        let avg_latency = latencies
            .filter(|v| !v.is_empty())
            .map(|v| v.iter().sum::<f64>() / v.len() as f64)
            .unwrap_or(0.0);

        MetricsSnapshot {
            events_processed_total: events,
            errors_generated_total: errors,
            integrity_violations_total: *counters.get("integrity_violations_total").unwrap_or(&0),
            alerts_generated_total: *counters.get("alerts_generated_total").unwrap_or(&0),
            suspicious_patterns_total: *counters.get("suspicious_patterns_total").unwrap_or(&0),
            queue_depth: *gauges.get("queue_depth").unwrap_or(&0.0),
            processing_latency_avg_ms: avg_latency,
            error_rate,
        }
    }

    /// Renders the default Prometheus registry as text exposition format,
    /// for a `/metrics` scrape endpoint.
    pub fn render_prometheus(&self) -> Result<String> {
        let metric_families = prometheus::gather();
        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&metric_families, &mut buffer)
            .map_err(|e| AuditError::Internal(format!("failed to encode prometheus metrics: {e}")))?;
        String::from_utf8(buffer).map_err(|e| AuditError::Internal(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_rate_is_zero_with_no_events() {
        let collector = MetricsCollector::new(false).unwrap();
        assert_eq!(collector.snapshot().error_rate, 0.0);
    }

    #[test]
    fn error_rate_reflects_counters() {
        let collector = MetricsCollector::new(false).unwrap();
        collector.increment_counter("events_processed_total", 100);
        collector.increment_counter("errors_generated_total", 10);
        assert_eq!(collector.snapshot().error_rate, 0.1);
    }

    #[test]
    fn histogram_average_reflects_samples() {
        let collector = MetricsCollector::new(false).unwrap();
        collector.record_histogram("processing_latency_ms", 10.0);
        collector.record_histogram("processing_latency_ms", 30.0);
        assert_eq!(collector.snapshot().processing_latency_avg_ms, 20.0);
    }
}
