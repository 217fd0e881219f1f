//! The Translator contract (spec §2, §4.3-§4.4): the pure transformation between
//! inbound and backend wire formats.
//!
//! Per spec §1's non-goal, only the OpenAI-to-OpenAI reference translator carries real
//! field-by-field logic; the other schema families get structurally complete
//! implementations with passthrough body handling. A `Translator` is constructed fresh
//! per upstream try and may hold per-try state (e.g. a partial SSE buffer).

pub mod openai;
pub mod stub;

use bytes::Bytes;

use crate::error::ProcessorError;
use crate::types::{LLMTokenUsage, SchemaFamily};

/// A set+remove header mutation pair, the shape both the Header Mutator and every
/// Translator hook return so the Upstream Processor can append them uniformly.
#[derive(Clone, Debug, Default)]
pub struct HeaderMutationOut {
    pub set: Vec<(String, String)>,
    pub remove: Vec<String>,
}

impl HeaderMutationOut {
    pub fn is_empty(&self) -> bool {
        self.set.is_empty() && self.remove.is_empty()
    }

    pub fn merge(&mut self, other: HeaderMutationOut) {
        self.set.extend(other.set);
        self.remove.extend(other.remove);
    }
}

/// A full-body replacement, as produced by a translator hook.
#[derive(Clone, Debug)]
pub struct BodyMutationOut {
    pub body: Bytes,
}

/// Whether a translator's per-chunk usage report is a delta to add or a running total to
/// assign, per spec §4.4. Avoids hidden behavioral differences across providers by
/// making this an explicit, queryable policy rather than inferred from message shape.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UsagePolicy {
    Additive,
    Cumulative,
}

/// The result of translating one response-body chunk.
#[derive(Clone, Debug, Default)]
pub struct TranslatedResponseBody {
    pub header_mutation: Option<HeaderMutationOut>,
    pub body_mutation: Option<BodyMutationOut>,
    pub token_usage: LLMTokenUsage,
    pub response_model: Option<String>,
}

/// A normalized, case-insensitive view of a header set, the shape every translator hook
/// receives instead of raw wire `HeaderValue` lists.
pub type HeaderView<'a> = &'a [(String, String)];

pub trait Translator: Send {
    fn family(&self) -> SchemaFamily;

    fn usage_policy(&self) -> UsagePolicy;

    /// Whether this translator requires the body to be rewritten even absent retry or
    /// forced-usage-opt-in (spec §4.3 step 2: "the translator reports the body must
    /// change"). Most translators never force this; family-specific wire remapping does.
    fn must_mutate_body(&self) -> bool {
        false
    }

    /// Translates the request body. `force` is true when retrying, when the router
    /// forced `stream_options.include_usage`, or when [`Translator::must_mutate_body`]
    /// is true.
    fn request_body(
        &mut self,
        raw: &Bytes,
        typed: &serde_json::Value,
        force: bool,
    ) -> Result<(Option<HeaderMutationOut>, Option<BodyMutationOut>), ProcessorError>;

    fn response_headers(
        &mut self,
        headers: HeaderView,
    ) -> Result<Option<HeaderMutationOut>, ProcessorError>;

    /// Translates one response-body chunk. `decoded` has already had content-encoding
    /// removed by the Upstream Processor.
    fn response_body(
        &mut self,
        headers: HeaderView,
        decoded: &[u8],
        end_of_stream: bool,
    ) -> Result<TranslatedResponseBody, ProcessorError>;

    /// Translates a non-2xx response body into an error-shaped mutation (spec §4.3 step
    /// 1, §8 scenario 4).
    fn response_error(
        &mut self,
        headers: HeaderView,
        decoded: &[u8],
    ) -> Result<Option<BodyMutationOut>, ProcessorError>;
}

pub fn find_header<'a>(headers: HeaderView<'a>, name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}
