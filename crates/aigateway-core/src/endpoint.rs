//! Endpoint path registry (spec §2, §6): maps a path prefix to the endpoint family the
//! request belongs to, and the family restrictions some endpoints enforce on backends.

use crate::types::SchemaFamily;

/// One of the six endpoint families named in spec §2's implementation budget. All six
/// share the same Router/Upstream processor shape; this enum carries the only thing
/// that varies structurally: the path, the declared-model JSON pointer, and which
/// backend schema families are acceptable.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EndpointKind {
    ChatCompletions,
    TextCompletions,
    Embeddings,
    ImageGenerations,
    AnthropicMessages,
    CohereRerank,
}

impl EndpointKind {
    pub const ALL: [EndpointKind; 6] = [
        EndpointKind::ChatCompletions,
        EndpointKind::TextCompletions,
        EndpointKind::Embeddings,
        EndpointKind::ImageGenerations,
        EndpointKind::AnthropicMessages,
        EndpointKind::CohereRerank,
    ];

    /// The exact inbound `:path` this endpoint is registered under.
    pub fn path(&self) -> &'static str {
        match self {
            EndpointKind::ChatCompletions => "/v1/chat/completions",
            EndpointKind::TextCompletions => "/v1/completions",
            EndpointKind::Embeddings => "/v1/embeddings",
            EndpointKind::ImageGenerations => "/v1/images/generations",
            EndpointKind::AnthropicMessages => "/v1/messages",
            EndpointKind::CohereRerank => "/cohere/v2/rerank",
        }
    }

    pub fn from_path(path: &str) -> Option<EndpointKind> {
        Self::ALL.into_iter().find(|e| e.path() == path)
    }

    /// Whether this endpoint restricts which backend schema families may serve it.
    /// Only the Anthropic `/v1/messages` endpoint enforces a restriction per spec §4.3.
    pub fn allows_family(&self, family: SchemaFamily) -> bool {
        match self {
            EndpointKind::AnthropicMessages => {
                matches!(family, SchemaFamily::Anthropic | SchemaFamily::Vertex | SchemaFamily::Bedrock)
            }
            _ => true,
        }
    }

    /// True for additive-usage endpoints per spec §4.4 (embeddings, rerank, text
    /// completions report deltas and are summed); false for cumulative endpoints
    /// (chat completions, Anthropic messages report running totals and are assigned).
    pub fn is_additive_usage(&self) -> bool {
        matches!(
            self,
            EndpointKind::Embeddings | EndpointKind::CohereRerank | EndpointKind::TextCompletions
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_every_registered_path() {
        for kind in EndpointKind::ALL {
            assert_eq!(EndpointKind::from_path(kind.path()), Some(kind));
        }
    }

    #[test]
    fn anthropic_messages_rejects_openai_family() {
        assert!(!EndpointKind::AnthropicMessages.allows_family(SchemaFamily::OpenAi));
        assert!(EndpointKind::AnthropicMessages.allows_family(SchemaFamily::Anthropic));
    }

    #[test]
    fn unknown_path_has_no_endpoint() {
        assert_eq!(EndpointKind::from_path("/not/a/real/path"), None);
    }
}
