//! Structurally complete translators for the backend families spec.md scopes out of
//! deep wire-mapping ("we specify what they must do, not how each provider maps"):
//! Bedrock, Azure OpenAI, GCP Vertex, Anthropic, Cohere. Each attaches no header/body
//! remap by default and extracts usage only where the shape is common enough to do
//! generically (an OpenAI-shaped `usage` object, when present); callers that need real
//! field-by-field conversion implement their own `Translator` and register it instead.

use bytes::Bytes;
use serde_json::Value;

use super::{BodyMutationOut, HeaderMutationOut, HeaderView, TranslatedResponseBody, Translator, UsagePolicy};
use crate::error::ProcessorError;
use crate::types::{LLMTokenUsage, SchemaFamily};

pub struct StubTranslator {
    family: SchemaFamily,
    usage_policy: UsagePolicy,
}

impl StubTranslator {
    pub fn new(family: SchemaFamily, usage_policy: UsagePolicy) -> Self {
        StubTranslator { family, usage_policy }
    }
}

fn generic_usage(value: &Value) -> LLMTokenUsage {
    let Some(usage) = value.get("usage") else {
        return LLMTokenUsage::default();
    };
    LLMTokenUsage {
        input: usage.get("prompt_tokens").or_else(|| usage.get("input_tokens")).and_then(Value::as_u64).unwrap_or(0) as u32,
        cached_input: usage.get("cached_tokens").and_then(Value::as_u64).unwrap_or(0) as u32,
        output: usage.get("completion_tokens").or_else(|| usage.get("output_tokens")).and_then(Value::as_u64).unwrap_or(0) as u32,
        total: usage.get("total_tokens").and_then(Value::as_u64).unwrap_or(0) as u32,
    }
}

impl Translator for StubTranslator {
    fn family(&self) -> SchemaFamily {
        self.family
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
        Ok((None, None))
    }

    fn response_headers(&mut self, _headers: HeaderView) -> Result<Option<HeaderMutationOut>, ProcessorError> {
        Ok(None)
    }

    fn response_body(
        &mut self,
        _headers: HeaderView,
        decoded: &[u8],
        _end_of_stream: bool,
    ) -> Result<TranslatedResponseBody, ProcessorError> {
        let value: Value = serde_json::from_slice(decoded).unwrap_or(Value::Null);
        let token_usage = generic_usage(&value);
        let response_model = value.get("model").and_then(Value::as_str).map(str::to_string);
        Ok(TranslatedResponseBody {
            header_mutation: None,
            body_mutation: None,
            token_usage,
            response_model,
        })
    }

    fn response_error(&mut self, _headers: HeaderView, _decoded: &[u8]) -> Result<Option<BodyMutationOut>, ProcessorError> {
        Ok(None)
    }
}

/// Selects a translator for the given family. `UnsupportedSchema` is the only error
/// path (spec §4.3): the family tag itself is always recognized by construction since
/// [`SchemaFamily`] is a closed enum, so this never actually fails today, but keeps the
/// error path real for a family that might later be removed from the registry below.
pub fn make_translator(family: SchemaFamily, usage_policy: UsagePolicy) -> Box<dyn Translator> {
    match family {
        SchemaFamily::OpenAi => Box::new(super::openai::OpenAiTranslator::new(usage_policy)),
        other => Box::new(StubTranslator::new(other, usage_policy)),
    }
}
