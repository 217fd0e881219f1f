//! The one concrete translator with real wire-mapping logic: OpenAI inbound to an
//! OpenAI-schema backend. Everything else is passthrough; the only real work is usage
//! extraction from both non-streaming bodies and SSE chunks (spec §4.4, §8 scenarios
//! 1-2).

use bytes::Bytes;
use serde_json::Value;

use super::{BodyMutationOut, HeaderMutationOut, HeaderView, TranslatedResponseBody, Translator, UsagePolicy};
use crate::error::ProcessorError;
use crate::types::{LLMTokenUsage, SchemaFamily};

pub struct OpenAiTranslator {
    /// Bytes carried over from a previous `response_body` call that did not end on an
    /// SSE frame boundary (`\n\n`).
    sse_buffer: Vec<u8>,
    usage_policy: UsagePolicy,
}

impl OpenAiTranslator {
    pub fn new(usage_policy: UsagePolicy) -> Self {
        OpenAiTranslator {
            sse_buffer: Vec::new(),
            usage_policy,
        }
    }
}

fn parse_usage(value: &Value) -> Option<LLMTokenUsage> {
    let usage = value.get("usage")?;
    let input = usage.get("prompt_tokens").and_then(Value::as_u64).unwrap_or(0) as u32;
    let output = usage.get("completion_tokens").and_then(Value::as_u64).unwrap_or(0) as u32;
    let total = usage.get("total_tokens").and_then(Value::as_u64).unwrap_or(0) as u32;
    let cached_input = usage
        .get("prompt_tokens_details")
        .and_then(|d| d.get("cached_tokens"))
        .and_then(Value::as_u64)
        .unwrap_or(0) as u32;
    Some(LLMTokenUsage {
        input,
        cached_input,
        output,
        total,
    })
}

fn parse_model(value: &Value) -> Option<String> {
    value.get("model").and_then(Value::as_str).map(str::to_string)
}

impl Translator for OpenAiTranslator {
    fn family(&self) -> SchemaFamily {
        SchemaFamily::OpenAi
    }

    fn usage_policy(&self) -> UsagePolicy {
        self.usage_policy
    }

    fn request_body(
        &mut self,
        _raw: &Bytes,
        _typed: &Value,
        _force: bool,
    ) -> Result<(Option<HeaderMutationOut>, Option<BodyMutationOut>), ProcessorError> {
        // Same schema in and out: nothing to remap. The router/mutator layers already
        // applied any operator-configured rewrites.
        Ok((None, None))
    }

    fn response_headers(&mut self, _headers: HeaderView) -> Result<Option<HeaderMutationOut>, ProcessorError> {
        Ok(None)
    }

    fn response_body(
        &mut self,
        _headers: HeaderView,
        decoded: &[u8],
        end_of_stream: bool,
    ) -> Result<TranslatedResponseBody, ProcessorError> {
        // Non-streaming: a single JSON object carries final usage and the model.
        if let Ok(value) = serde_json::from_slice::<Value>(decoded) {
            let token_usage = parse_usage(&value).unwrap_or_default();
            let response_model = parse_model(&value);
            return Ok(TranslatedResponseBody {
                header_mutation: None,
                body_mutation: None,
                token_usage,
                response_model,
            });
        }

        // Streaming: SSE frames separated by a blank line, each `data: <json>` or the
        // sentinel `data: [DONE]`.
        self.sse_buffer.extend_from_slice(decoded);
        let mut token_usage = LLMTokenUsage::default();
        let mut response_model = None;

        let mut consumed_to = 0;
        let buffer = std::mem::take(&mut self.sse_buffer);
        let text = String::from_utf8_lossy(&buffer);
        for (idx, frame) in split_sse_frames(&text) {
            consumed_to = idx;
            for line in frame.lines() {
                let Some(payload) = line.strip_prefix("data:") else {
                    continue;
                };
                let payload = payload.trim();
                if payload == "[DONE]" {
                    continue;
                }
                if let Ok(value) = serde_json::from_str::<Value>(payload) {
                    if let Some(usage) = parse_usage(&value) {
                        token_usage = usage;
                    }
                    if response_model.is_none() {
                        response_model = parse_model(&value);
                    }
                }
            }
        }
        self.sse_buffer = buffer[consumed_to..].to_vec();
        if end_of_stream && !self.sse_buffer.is_empty() {
            // Flush whatever is left even without a trailing blank line.
            let leftover = String::from_utf8_lossy(&self.sse_buffer).to_string();
            for line in leftover.lines() {
                if let Some(payload) = line.strip_prefix("data:") {
                    let payload = payload.trim();
                    if payload != "[DONE]" {
                        if let Ok(value) = serde_json::from_str::<Value>(payload) {
                            if let Some(usage) = parse_usage(&value) {
                                token_usage = usage;
                            }
                        }
                    }
                }
            }
            self.sse_buffer.clear();
        }

        Ok(TranslatedResponseBody {
            header_mutation: None,
            body_mutation: None,
            token_usage,
            response_model,
        })
    }

    fn response_error(&mut self, _headers: HeaderView, _decoded: &[u8]) -> Result<Option<BodyMutationOut>, ProcessorError> {
        // Error bodies pass through unchanged; only the completion bookkeeping differs.
        Ok(None)
    }
}

/// Splits on blank-line-delimited SSE frames, returning each frame along with the byte
/// offset immediately after it so the caller can retain any unconsumed trailing bytes.
fn split_sse_frames(text: &str) -> Vec<(usize, &str)> {
    let mut out = Vec::new();
    let mut start = 0;
    while let Some(rel) = text[start..].find("\n\n") {
        let end = start + rel;
        out.push((end + 2, &text[start..end]));
        start = end + 2;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_streaming_extracts_usage() {
        let mut t = OpenAiTranslator::new(UsagePolicy::Cumulative);
        let body = br#"{"model":"gpt-4o-mini","usage":{"prompt_tokens":3,"completion_tokens":5,"total_tokens":8}}"#;
        let result = t.response_body(&[], body, true).unwrap();
        assert_eq!(result.token_usage, LLMTokenUsage { input: 3, cached_input: 0, output: 5, total: 8 });
        assert_eq!(result.response_model.as_deref(), Some("gpt-4o-mini"));
    }

    #[test]
    fn streaming_extracts_usage_from_final_chunk() {
        let mut t = OpenAiTranslator::new(UsagePolicy::Cumulative);
        let chunk1 = b"data: {\"choices\":[{\"delta\":{\"content\":\"hi\"}}]}\n\n";
        let r1 = t.response_body(&[], chunk1, false).unwrap();
        assert_eq!(r1.token_usage, LLMTokenUsage::default());

        let chunk2 = b"data: {\"usage\":{\"prompt_tokens\":6,\"completion_tokens\":10,\"total_tokens\":16}}\n\ndata: [DONE]\n\n";
        let r2 = t.response_body(&[], chunk2, true).unwrap();
        assert_eq!(
            r2.token_usage,
            LLMTokenUsage { input: 6, cached_input: 0, output: 10, total: 16 }
        );
    }

    #[test]
    fn streaming_handles_split_frame_boundary() {
        let mut t = OpenAiTranslator::new(UsagePolicy::Cumulative);
        let part1 = b"data: {\"usage\":{\"prompt_tokens\":1,\"completion_tok";
        let r1 = t.response_body(&[], part1, false).unwrap();
        assert_eq!(r1.token_usage, LLMTokenUsage::default());

        let part2 = b"ens\":2,\"total_tokens\":3}}\n\n";
        let r2 = t.response_body(&[], part2, true).unwrap();
        assert_eq!(r2.token_usage, LLMTokenUsage { input: 1, cached_input: 0, output: 2, total: 3 });
    }
}
