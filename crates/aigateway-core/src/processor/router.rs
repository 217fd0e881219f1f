//! Router Processor (spec §4.2): parses the inbound request once per endpoint family,
//! injects routing headers, starts a trace span, and bridges response-side messages to
//! the attached Upstream Processor once one exists.

use std::sync::Arc;

use bytes::Bytes;
use serde_json::Value;
use tokio::sync::Mutex;

use protos::ext_proc_v3 as ep;

use super::upstream::UpstreamProcessor;
use super::wire;
use crate::endpoint::EndpointKind;
use crate::error::ProcessorError;
use crate::translator::HeaderMutationOut;
use crate::tracing_span::{SpanHandle, Tracer};
use crate::types::Config;

pub type UpstreamHandle = Arc<Mutex<UpstreamProcessor>>;

/// `Fresh -> AwaitBody -> BodyProcessed -> [ResponseBridged]* -> Terminal` (spec §4.2).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RouterState {
    Fresh,
    AwaitBody,
    BodyProcessed,
    Terminal,
}

pub struct RouterProcessor {
    pub kind: EndpointKind,
    pub config: Arc<Config>,
    pub original_path: String,
    pub request_headers: Vec<(String, String)>,
    pub original_request_body: Value,
    pub original_request_body_raw: Bytes,
    pub forced_stream_usage_opt_in: bool,
    pub span: Option<SpanHandle>,
    pub upstream: Option<UpstreamHandle>,
    pub try_count: u32,
    pub state: RouterState,
    tracer: Arc<Tracer>,
}

impl RouterProcessor {
    pub fn new(
        kind: EndpointKind,
        config: Arc<Config>,
        tracer: Arc<Tracer>,
        original_path: String,
        request_headers: Vec<(String, String)>,
    ) -> Self {
        RouterProcessor {
            kind,
            config,
            original_path,
            request_headers,
            original_request_body: Value::Null,
            original_request_body_raw: Bytes::new(),
            forced_stream_usage_opt_in: false,
            span: None,
            upstream: None,
            try_count: 0,
            state: RouterState::AwaitBody,
            tracer,
        }
    }

    /// The router's `ProcessRequestHeaders` step (spec §4.2): no rewriting happens yet,
    /// the body arrives next and carries the model name the router needs.
    pub fn process_request_headers(&mut self) -> Result<ep::ProcessingResponse, ProcessorError> {
        Ok(wire::request_headers_response(
            ep::common_response::ResponseStatus::Continue,
            None,
            None,
            None,
        ))
    }

    pub fn process_request_body(&mut self, raw: Bytes) -> Result<ep::ProcessingResponse, ProcessorError> {
        let mut value: Value =
            serde_json::from_slice(&raw).map_err(|e| ProcessorError::RequestParseError(e.to_string()))?;

        let model = value
            .get("model")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_default();

        let is_streaming = value.get("stream").and_then(Value::as_bool).unwrap_or(false);
        let has_cost_config = !self.config.llm_request_costs.is_empty();
        let mut working_raw = raw.clone();

        if is_streaming && has_cost_config {
            let include_usage_already = value
                .get("stream_options")
                .and_then(|s| s.get("include_usage"))
                .and_then(Value::as_bool)
                .unwrap_or(false);
            if !include_usage_already {
                let obj = value
                    .as_object_mut()
                    .ok_or_else(|| ProcessorError::RequestParseError("request body is not a JSON object".to_string()))?;
                let stream_options = obj
                    .entry("stream_options".to_string())
                    .or_insert_with(|| Value::Object(serde_json::Map::new()));
                if !stream_options.is_object() {
                    *stream_options = Value::Object(serde_json::Map::new());
                }
                stream_options
                    .as_object_mut()
                    .expect("ensured object above")
                    .insert("include_usage".to_string(), Value::Bool(true));
                self.forced_stream_usage_opt_in = true;
                working_raw =
                    Bytes::from(serde_json::to_vec(&value).map_err(|e| ProcessorError::RequestParseError(e.to_string()))?);
            }
        }

        self.original_request_body = value;
        self.original_request_body_raw = working_raw;

        let mut header_mutation = HeaderMutationOut::default();
        header_mutation
            .set
            .push((self.config.model_name_header_key.clone(), model));
        header_mutation
            .set
            .push(("x-ai-eg-original-path".to_string(), self.original_path.clone()));

        let span = self
            .tracer
            .start_span_and_inject_headers(self.kind.path(), &mut header_mutation);
        self.span = Some(span);
        self.state = RouterState::BodyProcessed;

        Ok(wire::request_body_response(wire::to_header_mutation(&header_mutation), true))
    }

    pub async fn process_response_headers(&mut self, headers: ep::HttpHeaders) -> Result<ep::ProcessingResponse, ProcessorError> {
        self.state = RouterState::Terminal;
        if let Some(upstream) = self.upstream.clone() {
            let mut upstream = upstream.lock().await;
            upstream.process_response_headers(headers).await
        } else {
            Ok(wire::response_headers_response(None, false))
        }
    }

    pub async fn process_response_body(&mut self, body: ep::HttpBody) -> Result<ep::ProcessingResponse, ProcessorError> {
        self.state = RouterState::Terminal;
        if let Some(upstream) = self.upstream.clone() {
            let mut upstream = upstream.lock().await;
            upstream.process_response_body(body).await
        } else {
            Ok(wire::response_body_response(None, None, None))
        }
    }
}
