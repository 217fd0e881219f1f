//! The process-local data model: Config, Backend, RequestCost, and the small
//! value types shared across processors.

use std::collections::HashMap;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::metadata::CostProgram;

/// A versioned snapshot produced by the Config Watcher and swapped atomically by the server.
#[derive(Clone, Debug)]
pub struct Config {
    pub uuid: String,
    pub schema: String,
    pub model_name_header_key: String,
    pub selected_route_header_key: String,
    pub metadata_namespace: String,
    pub rules: IndexMap<String, Backend>,
    pub llm_request_costs: Vec<RequestCost>,
    pub sensitive_headers: Vec<String>,
    pub tick_interval_ms: u64,
}

impl Config {
    /// The built-in configuration used when no file is present on disk.
    pub fn default_config() -> Self {
        Config {
            uuid: "00000000-0000-0000-0000-000000000000".to_string(),
            schema: "v1".to_string(),
            model_name_header_key: "x-ai-eg-model".to_string(),
            selected_route_header_key: "x-ai-eg-selected-backend".to_string(),
            metadata_namespace: "aigateway.envoy.io".to_string(),
            rules: IndexMap::new(),
            llm_request_costs: Vec::new(),
            sensitive_headers: vec!["authorization".to_string()],
            tick_interval_ms: 1000,
        }
    }

    pub fn backend(&self, name: &str) -> Option<&Backend> {
        self.rules.get(name)
    }

    pub fn is_sensitive_header(&self, name: &str) -> bool {
        self.sensitive_headers
            .iter()
            .any(|h| h.eq_ignore_ascii_case(name))
    }
}

/// The closed set of backend wire-format families a Translator can be selected for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SchemaFamily {
    OpenAi,
    Bedrock,
    AzureOpenAi,
    Vertex,
    Anthropic,
    Cohere,
}

impl SchemaFamily {
    pub fn as_str(&self) -> &'static str {
        match self {
            SchemaFamily::OpenAi => "openai",
            SchemaFamily::Bedrock => "bedrock",
            SchemaFamily::AzureOpenAi => "azure_openai",
            SchemaFamily::Vertex => "vertex",
            SchemaFamily::Anthropic => "anthropic",
            SchemaFamily::Cohere => "cohere",
        }
    }
}

#[derive(Clone, Debug)]
pub struct BackendSchema {
    pub family_tag: SchemaFamily,
    pub version: String,
}

/// A declarative header mutation as carried in config: what to set, what to remove.
#[derive(Clone, Debug, Default)]
pub struct HeaderMutationConfig {
    pub set: Vec<(String, String)>,
    pub remove: Vec<String>,
}

/// A declarative body mutation as carried in config: JSON-pointer-like path operations.
#[derive(Clone, Debug, Default)]
pub struct BodyMutationConfig {
    pub set: Vec<(String, String)>,
    pub remove: Vec<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AuthKind {
    StaticApiKey,
    BearerPassthrough,
}

#[derive(Clone, Debug)]
pub struct AuthConfig {
    pub kind: AuthKind,
    /// For `StaticApiKey`, the header name the key is attached under (default `x-api-key`).
    pub header_name: Option<String>,
    /// For `StaticApiKey`, the key value itself.
    pub key: Option<String>,
}

#[derive(Clone, Debug)]
pub struct Backend {
    pub name: String,
    pub schema: BackendSchema,
    pub model_name_override: Option<String>,
    pub header_mutation: Option<HeaderMutationConfig>,
    pub body_mutation: Option<BodyMutationConfig>,
    pub auth: Option<AuthConfig>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RequestCostKind {
    InputToken,
    CachedInputToken,
    OutputToken,
    TotalToken,
    Cel,
}

/// One entry of the operator-configured cost/metadata assembly list. `cel_program` is the
/// precompiled artifact built at config-load time; it is `None` for non-`Cel` kinds.
#[derive(Clone)]
pub struct RequestCost {
    pub kind: RequestCostKind,
    pub metadata_key: String,
    pub cel_program: Option<std::sync::Arc<dyn CostProgram>>,
}

impl std::fmt::Debug for RequestCost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestCost")
            .field("kind", &self.kind)
            .field("metadata_key", &self.metadata_key)
            .field("cel_program", &self.cel_program.is_some())
            .finish()
    }
}

/// `{input, cachedInput, output, total}` token counters, all unsigned 32-bit.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LLMTokenUsage {
    pub input: u32,
    pub cached_input: u32,
    pub output: u32,
    pub total: u32,
}

impl LLMTokenUsage {
    pub fn add(&mut self, other: LLMTokenUsage) {
        self.input += other.input;
        self.cached_input += other.cached_input;
        self.output += other.output;
        self.total += other.total;
    }
}

/// Variables a `cel` RequestCost program is evaluated against.
#[derive(Clone, Debug, Default)]
pub struct CostVars {
    pub model: String,
    pub backend: String,
    pub input: u32,
    pub cached_input: u32,
    pub output: u32,
    pub total: u32,
}

impl CostVars {
    pub fn as_map(&self) -> HashMap<String, cel_interpreter::Value> {
        let mut m = HashMap::new();
        m.insert(
            "model".to_string(),
            cel_interpreter::Value::String(self.model.clone().into()),
        );
        m.insert(
            "backend".to_string(),
            cel_interpreter::Value::String(self.backend.clone().into()),
        );
        m.insert("input".to_string(), cel_interpreter::Value::UInt(self.input as u64));
        m.insert(
            "cachedInput".to_string(),
            cel_interpreter::Value::UInt(self.cached_input as u64),
        );
        m.insert("output".to_string(), cel_interpreter::Value::UInt(self.output as u64));
        m.insert("total".to_string(), cel_interpreter::Value::UInt(self.total as u64));
        m
    }
}
