//! Metrics Sink (spec §2, §4.3, §4.4): Prometheus counters/histograms plus a
//! per-upstream-session recorder that enforces "exactly one completion" (spec §8).

use std::sync::Mutex;
use std::time::Instant;

use prometheus_client::encoding::{EncodeLabelSet, EncodeLabelValue};
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::histogram::Histogram;
use prometheus_client::registry::Registry;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, EncodeLabelValue)]
pub enum Outcome {
    Success,
    Failure,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct RequestLabels {
    pub backend: String,
    pub model: String,
    pub outcome: Outcome,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ModelLabels {
    pub backend: String,
    pub model: String,
}

pub struct Metrics {
    pub registry: Mutex<Registry>,
    requests_total: Family<RequestLabels, Counter>,
    input_tokens_total: Family<ModelLabels, Counter>,
    cached_input_tokens_total: Family<ModelLabels, Counter>,
    output_tokens_total: Family<ModelLabels, Counter>,
    total_tokens_total: Family<ModelLabels, Counter>,
    ttft_ms: Family<ModelLabels, Histogram>,
    itl_ms: Family<ModelLabels, Histogram>,
}

fn latency_buckets() -> impl Iterator<Item = f64> + Clone {
    [5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 2500.0, 5000.0, 10000.0].into_iter()
}

impl Metrics {
    pub fn new() -> Self {
        let mut registry = Registry::default();
        let requests_total = Family::<RequestLabels, Counter>::default();
        let input_tokens_total = Family::<ModelLabels, Counter>::default();
        let cached_input_tokens_total = Family::<ModelLabels, Counter>::default();
        let output_tokens_total = Family::<ModelLabels, Counter>::default();
        let total_tokens_total = Family::<ModelLabels, Counter>::default();
        let ttft_ms = Family::<ModelLabels, Histogram>::new_with_constructor(|| Histogram::new(latency_buckets()));
        let itl_ms = Family::<ModelLabels, Histogram>::new_with_constructor(|| Histogram::new(latency_buckets()));

        registry.register("aigateway_requests", "Completed upstream requests", requests_total.clone());
        registry.register("aigateway_input_tokens", "Accumulated input tokens", input_tokens_total.clone());
        registry.register(
            "aigateway_cached_input_tokens",
            "Accumulated cached input tokens",
            cached_input_tokens_total.clone(),
        );
        registry.register("aigateway_output_tokens", "Accumulated output tokens", output_tokens_total.clone());
        registry.register("aigateway_total_tokens", "Accumulated total tokens", total_tokens_total.clone());
        registry.register("aigateway_token_latency_ttft_ms", "Time to first token", ttft_ms.clone());
        registry.register("aigateway_token_latency_itl_ms", "Inter-token latency", itl_ms.clone());

        Metrics {
            registry: Mutex::new(registry),
            requests_total,
            input_tokens_total,
            cached_input_tokens_total,
            output_tokens_total,
            total_tokens_total,
            ttft_ms,
            itl_ms,
        }
    }

    pub fn export(&self) -> String {
        let mut buf = String::new();
        prometheus_client::encoding::text::encode(&mut buf, &self.registry.lock().unwrap()).unwrap_or_default();
        buf
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-upstream-session recorder. Tracks the request/response model labels and the
/// streaming latency clock, and guards the "exactly one completion" invariant.
pub struct RequestRecorder {
    metrics: std::sync::Arc<Metrics>,
    backend: String,
    original_model: String,
    request_model: String,
    response_model: Option<String>,
    started_at: Option<Instant>,
    first_token_at: Option<Instant>,
    last_token_at: Option<Instant>,
    ttft_ms: Option<f64>,
    itl_ms: Option<f64>,
    completed: bool,
}

impl RequestRecorder {
    pub fn new(metrics: std::sync::Arc<Metrics>, backend: String) -> Self {
        RequestRecorder {
            metrics,
            backend,
            original_model: String::new(),
            request_model: String::new(),
            response_model: None,
            started_at: None,
            first_token_at: None,
            last_token_at: None,
            ttft_ms: None,
            itl_ms: None,
            completed: false,
        }
    }

    pub fn start_request(&mut self) {
        self.started_at = Some(Instant::now());
    }

    pub fn set_original_model(&mut self, model: &str) {
        self.original_model = model.to_string();
    }

    pub fn set_request_model(&mut self, model: &str) {
        self.request_model = model.to_string();
    }

    pub fn set_response_model(&mut self, model: &str) {
        self.response_model = Some(model.to_string());
    }

    /// Called after each streaming chunk that carries an output-token delta; derives
    /// TTFT (first call) and ITL (subsequent calls), matching spec §4.4.
    pub fn record_token_latency(&mut self, output_delta: u32, _end_of_stream: bool) {
        if output_delta == 0 {
            return;
        }
        let now = Instant::now();
        if self.first_token_at.is_none() {
            self.first_token_at = Some(now);
            if let Some(start) = self.started_at {
                self.ttft_ms = Some(now.duration_since(start).as_secs_f64() * 1000.0);
            }
        } else if let Some(last) = self.last_token_at {
            self.itl_ms = Some(now.duration_since(last).as_secs_f64() * 1000.0);
        }
        self.last_token_at = Some(now);
    }

    pub fn record_token_usage(&self, usage: crate::types::LLMTokenUsage) {
        let labels = ModelLabels {
            backend: self.backend.clone(),
            model: self.effective_model(),
        };
        self.metrics.input_tokens_total.get_or_create(&labels).inc_by(usage.input as u64);
        self.metrics
            .cached_input_tokens_total
            .get_or_create(&labels)
            .inc_by(usage.cached_input as u64);
        self.metrics.output_tokens_total.get_or_create(&labels).inc_by(usage.output as u64);
        self.metrics.total_tokens_total.get_or_create(&labels).inc_by(usage.total as u64);
        if let Some(ttft) = self.ttft_ms {
            self.metrics.ttft_ms.get_or_create(&labels).observe(ttft);
        }
        if let Some(itl) = self.itl_ms {
            self.metrics.itl_ms.get_or_create(&labels).observe(itl);
        }
    }

    pub fn ttft_ms(&self) -> Option<f64> {
        self.ttft_ms
    }

    pub fn itl_ms(&self) -> Option<f64> {
        self.itl_ms
    }

    fn effective_model(&self) -> String {
        self.response_model
            .clone()
            .unwrap_or_else(|| self.request_model.clone())
    }

    /// Records exactly one completion. A second call is a logic error in the caller and
    /// is ignored rather than double-counted, preserving spec §8's "exactly one" law.
    pub fn record_completion(&mut self, success: bool) {
        if self.completed {
            return;
        }
        self.completed = true;
        let labels = RequestLabels {
            backend: self.backend.clone(),
            model: self.effective_model(),
            outcome: if success { Outcome::Success } else { Outcome::Failure },
        };
        self.metrics.requests_total.get_or_create(&labels).inc();
    }

    pub fn already_completed(&self) -> bool {
        self.completed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::LLMTokenUsage;
    use std::sync::Arc;

    #[test]
    fn completion_fires_exactly_once() {
        let metrics = Arc::new(Metrics::new());
        let mut recorder = RequestRecorder::new(metrics, "openai-main".to_string());
        recorder.set_request_model("gpt-4o-mini");
        recorder.record_completion(true);
        recorder.record_completion(true);
        assert!(recorder.already_completed());
    }

    #[test]
    fn token_usage_is_recorded_without_panicking() {
        let metrics = Arc::new(Metrics::new());
        let mut recorder = RequestRecorder::new(metrics.clone(), "openai-main".to_string());
        recorder.set_request_model("gpt-4o-mini");
        recorder.record_token_usage(LLMTokenUsage { input: 3, cached_input: 0, output: 5, total: 8 });
        let exported = metrics.export();
        assert!(exported.contains("aigateway_total_tokens"));
    }
}
