//! Tracer (spec §2, §4.2-§4.3) and the W3C `traceparent` header format it injects,
//! grounded on the teacher's `telemetry/trc.rs` `Tracer`/`traceparent` module.

use opentelemetry::trace::{
    SpanContext, SpanId, SpanKind, Status, TraceContextExt, TraceFlags, TraceId, Tracer as OtelTracer,
};
use opentelemetry::{Context, KeyValue};
use opentelemetry_sdk::trace::{SdkTracer, SdkTracerProvider};

use crate::translator::HeaderMutationOut;

#[derive(Clone, Debug, Default)]
pub struct TracerConfig {
    /// OTLP collector endpoint. `None` disables export (spans are created and ended but
    /// never shipped) — logging sink / exporter *configuration* is a non-goal per spec §1.
    pub otlp_endpoint: Option<String>,
}

pub struct Tracer {
    tracer: SdkTracer,
    provider: SdkTracerProvider,
}

impl Tracer {
    pub fn new(config: &TracerConfig) -> anyhow::Result<Self> {
        let provider = match &config.otlp_endpoint {
            Some(endpoint) => {
                let exporter = opentelemetry_otlp::SpanExporter::builder()
                    .with_tonic()
                    .with_endpoint(endpoint.clone())
                    .build()?;
                SdkTracerProvider::builder()
                    .with_batch_exporter(exporter)
                    .build()
            }
            None => SdkTracerProvider::builder().build(),
        };
        let tracer = provider.tracer("aigateway-ext-proc");
        Ok(Tracer { tracer, provider })
    }

    pub fn shutdown(&self) {
        let _ = self.provider.shutdown();
    }

    /// Starts a span for the stream and appends a `traceparent` header to `header_mutation`
    /// so the tracer's own propagation header rides along with the router's mutation
    /// (spec §4.2 step 5: "the tracer may append its own propagation headers").
    pub fn start_span_and_inject_headers(&self, name: &str, header_mutation: &mut HeaderMutationOut) -> SpanHandle {
        let span = self.tracer.span_builder(name.to_string()).with_kind(SpanKind::Server).start(&self.tracer);
        let parent = TraceParent::from_span_context(span.span_context());
        header_mutation.set.push(("traceparent".to_string(), parent.to_string()));
        SpanHandle { span }
    }

    pub fn end(&self, _handle: SpanHandle) {
        // Dropping the span ends it; the provider's batch exporter (if configured) ships it.
    }

    /// Ends a span on a non-2xx response (spec §4.3 step ProcessResponseBody.1, §8
    /// scenario 4): records the error status and the response body size.
    pub fn end_span_on_error(&self, mut handle: SpanHandle, status_code: u16, body: &[u8]) {
        handle.span.set_status(Status::error(format!("upstream responded {status_code}")));
        handle.span.set_attribute(KeyValue::new("http.response.status_code", status_code as i64));
        handle.span.set_attribute(KeyValue::new("http.response.body.size", body.len() as i64));
    }
}

pub struct SpanHandle {
    span: opentelemetry_sdk::trace::Span,
}

impl SpanHandle {
    pub fn span_context(&self) -> SpanContext {
        use opentelemetry::trace::Span;
        self.span.span_context().clone()
    }
}

/// A W3C `traceparent` header value: `version-trace_id-span_id-flags`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TraceParent {
    pub version: u8,
    pub trace_id: TraceId,
    pub span_id: SpanId,
    pub flags: TraceFlags,
}

impl Default for TraceParent {
    fn default() -> Self {
        TraceParent {
            version: 0,
            trace_id: TraceId::INVALID,
            span_id: SpanId::INVALID,
            flags: TraceFlags::default(),
        }
    }
}

impl TraceParent {
    pub fn from_span_context(ctx: &SpanContext) -> Self {
        TraceParent {
            version: 0,
            trace_id: ctx.trace_id(),
            span_id: ctx.span_id(),
            flags: ctx.trace_flags(),
        }
    }

    pub fn new_span(&self) -> SpanId {
        SpanId::from_bytes(rand::random::<[u8; 8]>())
    }

    pub fn is_sampled(&self) -> bool {
        self.flags.is_sampled()
    }

    pub fn insert_header(&self, header_mutation: &mut HeaderMutationOut) {
        header_mutation.set.push(("traceparent".to_string(), self.to_string()));
    }
}

impl std::fmt::Display for TraceParent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{:02x}-{}-{}-{:02x}",
            self.version,
            self.trace_id,
            self.span_id,
            self.flags.to_u8()
        )
    }
}

impl TryFrom<&str> for TraceParent {
    type Error = crate::error::ProcessorError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        let parts: Vec<&str> = value.split('-').collect();
        if parts.len() != 4 {
            return Err(crate::error::ProcessorError::InternalInvariantError(format!(
                "malformed traceparent: {value}"
            )));
        }
        let version = u8::from_str_radix(parts[0], 16)
            .map_err(|e| crate::error::ProcessorError::InternalInvariantError(e.to_string()))?;
        let trace_id = TraceId::from_hex(parts[1])
            .map_err(|e| crate::error::ProcessorError::InternalInvariantError(e.to_string()))?;
        let span_id = SpanId::from_hex(parts[2])
            .map_err(|e| crate::error::ProcessorError::InternalInvariantError(e.to_string()))?;
        let flags = u8::from_str_radix(parts[3], 16)
            .map_err(|e| crate::error::ProcessorError::InternalInvariantError(e.to_string()))?;
        Ok(TraceParent {
            version,
            trace_id,
            span_id,
            flags: TraceFlags::new(flags),
        })
    }
}

pub fn current_context_has_parent() -> bool {
    Context::current().span().span_context().is_valid()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_header_format() {
        let tp = TraceParent {
            version: 0,
            trace_id: TraceId::from_bytes([1; 16]),
            span_id: SpanId::from_bytes([2; 8]),
            flags: TraceFlags::SAMPLED,
        };
        let header = tp.to_string();
        let parsed = TraceParent::try_from(header.as_str()).unwrap();
        assert_eq!(parsed.trace_id, tp.trace_id);
        assert_eq!(parsed.span_id, tp.span_id);
        assert!(parsed.is_sampled());
    }

    #[test]
    fn rejects_malformed_header() {
        assert!(TraceParent::try_from("not-a-traceparent").is_err());
    }
}
