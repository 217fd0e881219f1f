//! Upstream Processor (spec §4.3): owns the backend-specific translation, mutation,
//! auth, decoding, and accounting work for one try against one selected backend.

use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::Mutex;

use protos::core_v3 as core;
use protos::ext_proc_v3 as ep;

use super::router::{RouterProcessor, RouterState, UpstreamHandle};
use super::wire;
use crate::auth::{self, BackendAuthHandler};
use crate::decode::{self, ContentEncoding, StreamingDecoder};
use crate::endpoint::EndpointKind;
use crate::error::ProcessorError;
use crate::metadata::{self, CostSnapshot};
use crate::metrics::{Metrics, RequestRecorder};
use crate::mutate::body::BodyMutator;
use crate::mutate::header::HeaderMutator;
use crate::translator::{self, Translator, UsagePolicy};
use crate::tracing_span::{SpanHandle, Tracer};
use crate::types::{Config, LLMTokenUsage};

pub struct UpstreamProcessor {
    pub kind: EndpointKind,
    pub config: Arc<Config>,
    pub backend_name: String,
    pub try_count: u32,
    translator: Box<dyn Translator>,
    header_mutator: Option<HeaderMutator>,
    body_mutator: Option<BodyMutator>,
    auth: Option<Box<dyn BackendAuthHandler>>,
    recorder: RequestRecorder,
    tracer: Arc<Tracer>,
    span: Option<SpanHandle>,
    decoder: Option<StreamingDecoder>,
    request_headers: Vec<(String, String)>,
    original_request_body: serde_json::Value,
    original_request_body_raw: Bytes,
    forced_stream_usage_opt_in: bool,
    request_model: String,
    streamed: bool,
    usage_totals: LLMTokenUsage,
    responded_error: bool,
    /// `:status` observed on `ProcessResponseHeaders`. Drives the non-2xx branch in
    /// `process_response_body`.
    response_status: u16,
    /// Raw (pre-decode) bytes of a non-2xx response body, accumulated until
    /// `end_of_stream` so the error body is decoded whole.
    error_body_buffer: Vec<u8>,
}

impl UpstreamProcessor {
    /// Initializes an upstream try against `backend_name` from the router's stored
    /// request state, registers itself on the router so future response-phase
    /// messages on the router stream are delegated here, and returns the shared
    /// handle.
    pub async fn set_backend_for_router(
        router: &Arc<Mutex<RouterProcessor>>,
        metrics: Arc<Metrics>,
        tracer: Arc<Tracer>,
        backend_name: &str,
    ) -> Result<UpstreamHandle, ProcessorError> {
        let mut router_guard = router.lock().await;
        if router_guard.state != RouterState::BodyProcessed && router_guard.state != RouterState::Terminal {
            return Err(ProcessorError::InternalInvariantError(
                "SetBackend arrived before the router processed the request body".to_string(),
            ));
        }

        let config = router_guard.config.clone();
        let backend = config
            .backend(backend_name)
            .ok_or_else(|| ProcessorError::NotFound(format!("backend {backend_name}")))?
            .clone();

        if !router_guard.kind.allows_family(backend.schema.family_tag) {
            return Err(ProcessorError::UnsupportedSchema(format!(
                "{:?} does not accept backend family {:?}",
                router_guard.kind, backend.schema.family_tag
            )));
        }

        router_guard.try_count += 1;
        let on_retry = router_guard.try_count > 1;

        let usage_policy = if router_guard.kind.is_additive_usage() {
            UsagePolicy::Additive
        } else {
            UsagePolicy::Cumulative
        };
        let translator = translator::stub::make_translator(backend.schema.family_tag, usage_policy);

        let header_mutator = backend
            .header_mutation
            .clone()
            .map(|cfg| HeaderMutator::new(cfg, router_guard.request_headers.clone()));
        let body_mutator = backend.body_mutation.clone().map(BodyMutator::new);
        let auth_handler = auth::make_auth_handler(backend.auth.as_ref());

        let request_model = backend
            .model_name_override
            .clone()
            .or_else(|| {
                router_guard
                    .original_request_body
                    .get("model")
                    .and_then(serde_json::Value::as_str)
                    .map(str::to_string)
            })
            .unwrap_or_default();

        let mut recorder = RequestRecorder::new(metrics, backend_name.to_string());
        recorder.set_original_model(
            router_guard
                .original_request_body
                .get("model")
                .and_then(serde_json::Value::as_str)
                .unwrap_or_default(),
        );
        recorder.set_request_model(&request_model);

        let processor = UpstreamProcessor {
            kind: router_guard.kind,
            config,
            backend_name: backend_name.to_string(),
            try_count: router_guard.try_count,
            translator,
            header_mutator,
            body_mutator,
            auth: auth_handler,
            recorder,
            tracer,
            span: router_guard.span.take(),
            decoder: None,
            request_headers: router_guard.request_headers.clone(),
            original_request_body: router_guard.original_request_body.clone(),
            original_request_body_raw: router_guard.original_request_body_raw.clone(),
            forced_stream_usage_opt_in: router_guard.forced_stream_usage_opt_in,
            request_model,
            streamed: false,
            usage_totals: LLMTokenUsage::default(),
            responded_error: false,
            response_status: 200,
            error_body_buffer: Vec::new(),
        };
        let _ = on_retry;

        let handle = Arc::new(Mutex::new(processor));
        router_guard.upstream = Some(handle.clone());
        Ok(handle)
    }

    /// Records a failed completion before handing `err` back to the caller, so a request
    /// that fails before any response arrives still produces exactly one completion.
    fn record_request_failure(&mut self, err: ProcessorError) -> ProcessorError {
        self.recorder.record_completion(false);
        err
    }

    pub fn process_request_headers(&mut self) -> Result<ep::ProcessingResponse, ProcessorError> {
        self.recorder.start_request();
        self.streamed = self
            .original_request_body
            .get("stream")
            .and_then(serde_json::Value::as_bool)
            .unwrap_or(false);

        let force = self.try_count > 1 || self.forced_stream_usage_opt_in || self.translator.must_mutate_body();

        let translated = self
            .translator
            .request_body(&self.original_request_body_raw, &self.original_request_body, force);
        let (translator_headers, translator_body) = match translated {
            Ok(v) => v,
            Err(e) => return Err(self.record_request_failure(e)),
        };

        let mut final_headers = self.request_headers.clone();
        let mut accumulated_header_mutation = translator_headers.unwrap_or_default();

        if let Some(mutator) = &self.header_mutator {
            let on_retry = self.try_count > 1;
            let out = mutator.apply(&mut final_headers, on_retry);
            accumulated_header_mutation.merge(out);
        }

        let mut body: Bytes = translator_body
            .map(|b| b.body)
            .unwrap_or_else(|| self.original_request_body_raw.clone());

        if let Some(mutator) = &self.body_mutator {
            if !mutator.is_empty() {
                let mutated = mutator.apply(&body);
                body = match mutated {
                    Ok(b) => b,
                    Err(e) => return Err(self.record_request_failure(e)),
                };
            }
        }

        if let Some(auth) = &self.auth {
            let authed = auth.apply(&mut final_headers, &body);
            match authed {
                Ok(Some(rewritten)) => body = rewritten,
                Ok(None) => {}
                Err(e) => return Err(self.record_request_failure(e)),
            }
        }

        let content_length_metadata = wire::metadata_of(
            self.config.metadata_namespace.clone(),
            metadata::content_length_struct(body.len()),
        );

        Ok(wire::request_headers_continue_and_replace(
            wire::to_header_mutation(&accumulated_header_mutation),
            Some(wire::bytes_body_mutation(body)),
            Some(content_length_metadata),
        ))
    }

    pub fn process_request_body(&mut self, _body: ep::HttpBody) -> Result<ep::ProcessingResponse, ProcessorError> {
        Err(ProcessorError::InternalInvariantError(
            "upstream processors never receive RequestBody; the full body is replaced in ProcessRequestHeaders".to_string(),
        ))
    }

    pub async fn process_response_headers(&mut self, headers: ep::HttpHeaders) -> Result<ep::ProcessingResponse, ProcessorError> {
        let header_map = headers.headers.unwrap_or_default();
        let pairs = wire::headers_to_pairs(&header_map);

        let status = pairs
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(":status"))
            .and_then(|(_, v)| v.parse::<u16>().ok())
            .unwrap_or(200);
        self.response_status = status;

        let content_encoding = decode::detect_encoding(translator::find_header(&pairs, "content-encoding"));
        self.decoder = Some(StreamingDecoder::new(content_encoding));

        let translator_headers = self.translator.response_headers(&pairs)?;

        if !(200..300).contains(&status) {
            return Ok(wire::response_headers_response(wire::to_header_mutation(&translator_headers.unwrap_or_default()), false));
        }

        Ok(wire::response_headers_response(
            wire::to_header_mutation(&translator_headers.unwrap_or_default()),
            self.streamed,
        ))
    }

    pub async fn process_response_body(&mut self, body: ep::HttpBody) -> Result<ep::ProcessingResponse, ProcessorError> {
        let end_of_stream = body.end_of_stream;

        if self.responded_error {
            return Ok(wire::response_body_response(None, None, None));
        }

        if !(200..300).contains(&self.response_status) {
            self.error_body_buffer.extend_from_slice(&body.body);
            if !end_of_stream {
                return Ok(wire::response_body_response(None, None, None));
            }
            let encoding = self.decoder.as_ref().map(|d| d.encoding()).unwrap_or(ContentEncoding::Identity);
            let raw = std::mem::take(&mut self.error_body_buffer);
            let decoded = decode::decode_complete(encoding, &raw).await?;
            return self.finish_as_error(self.response_status, &decoded);
        }

        let decoder = self
            .decoder
            .as_mut()
            .ok_or_else(|| ProcessorError::InternalInvariantError("ProcessResponseBody before ProcessResponseHeaders".to_string()))?;

        let decoded = decoder.push(&body.body, end_of_stream).await?;

        let response = self
            .translator
            .response_body(&self.request_headers, &decoded.data, end_of_stream)?;

        if let Some(model) = &response.response_model {
            self.recorder.set_response_model(model);
        }

        let mut header_mutation = response.header_mutation.unwrap_or_default();
        if decoded.is_encoded && response.body_mutation.is_some() {
            header_mutation.remove.push("content-encoding".to_string());
        }

        match self.translator.usage_policy() {
            UsagePolicy::Additive => self.usage_totals.add(response.token_usage),
            UsagePolicy::Cumulative => {
                if response.token_usage != LLMTokenUsage::default() {
                    self.usage_totals = response.token_usage;
                }
            }
        }
        self.recorder.record_token_latency(response.token_usage.output, end_of_stream);

        let mut dynamic_metadata = None;
        if end_of_stream {
            self.recorder.record_token_usage(self.usage_totals);
            self.recorder.record_completion(true);
            if let Some(span) = self.span.take() {
                self.tracer.end(span);
            }

            if !self.config.llm_request_costs.is_empty() {
                let snapshot = CostSnapshot {
                    model: self.request_model.clone(),
                    backend: self.backend_name.clone(),
                    input: self.usage_totals.input,
                    cached_input: self.usage_totals.cached_input,
                    output: self.usage_totals.output,
                    total: self.usage_totals.total,
                    token_latency_ttft_ms: self.recorder.ttft_ms(),
                    token_latency_itl_ms: self.recorder.itl_ms(),
                };
                let inner = metadata::build_dynamic_metadata(&self.config.llm_request_costs, &snapshot)?;
                dynamic_metadata = Some(wire::metadata_of(self.config.metadata_namespace.clone(), inner));
            }
        }

        let body_mutation = response.body_mutation.map(|b| wire::bytes_body_mutation(b.body));

        Ok(wire::response_body_response(
            wire::to_header_mutation(&header_mutation),
            body_mutation,
            dynamic_metadata,
        ))
    }

    /// Shared tail of the non-2xx path (spec §4.3 ProcessResponseBody step 1, §8
    /// scenario 4): translates the error body, ends the span with an error status, and
    /// records the one completion for this stream as a failure.
    fn finish_as_error(&mut self, status: u16, decoded: &decode::DecodingResult) -> Result<ep::ProcessingResponse, ProcessorError> {
        let mutation = self.translator.response_error(&self.request_headers, &decoded.data)?;

        if let Some(span) = self.span.take() {
            self.tracer.end_span_on_error(span, status, &decoded.data);
        }
        self.recorder.record_completion(false);
        self.responded_error = true;

        let header_mutation = if decoded.is_encoded && mutation.is_some() {
            let mut out = crate::translator::HeaderMutationOut::default();
            out.remove.push("content-encoding".to_string());
            Some(out)
        } else {
            None
        };

        Ok(wire::response_body_response(
            wire::to_header_mutation(&header_mutation.unwrap_or_default()),
            mutation.map(|b| wire::bytes_body_mutation(b.body)),
            None,
        ))
    }

    /// Invoked instead of `process_response_body` once a non-2xx status has been
    /// observed on `ProcessResponseHeaders`, once the full error body has arrived.
    /// `process_response_body` reaches the same [`Self::finish_as_error`] tail on its own
    /// once it has buffered a non-2xx body to `end_of_stream`; this entry point remains
    /// for callers that already hold the complete, undecoded error body in hand.
    pub async fn process_response_error(&mut self, status: u16, body: ep::HttpBody) -> Result<ep::ProcessingResponse, ProcessorError> {
        let decoded = decode::decode_complete(
            self.decoder.as_ref().map(|d| d.encoding()).unwrap_or(ContentEncoding::Identity),
            &body.body,
        )
        .await?;

        self.finish_as_error(status, &decoded)
    }

    /// Whether this try has already completed via the non-2xx error tail. Exposed for
    /// tests that need to confirm the error path, rather than the success path, fired.
    pub fn responded_error(&self) -> bool {
        self.responded_error
    }

    pub fn is_error_status(headers: &core::HeaderMap) -> Option<u16> {
        let pairs = wire::headers_to_pairs(headers);
        pairs
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(":status"))
            .and_then(|(_, v)| v.parse::<u16>().ok())
            .filter(|status| !(200..300).contains(status))
    }
}
