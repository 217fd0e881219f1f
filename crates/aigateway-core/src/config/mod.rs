//! Config file format and parsing (spec §4.7, §6).

pub mod watcher;

use std::collections::HashMap;

use indexmap::IndexMap;
use serde::Deserialize;
use thiserror::Error;

use crate::metadata::compile_cel;
use crate::types::{
    AuthConfig, AuthKind, Backend, BackendSchema, BodyMutationConfig, Config, HeaderMutationConfig,
    RequestCost, RequestCostKind, SchemaFamily,
};

#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("invalid config: {0}")]
    Invalid(String),
    #[error(transparent)]
    Cel(#[from] crate::error::ProcessorError),
}

/// The on-disk document shape, deserialized with serde before being lowered into the
/// runtime [`Config`]. Field names match spec §6's config file contract exactly.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawConfig {
    #[serde(default = "default_schema")]
    schema: String,
    #[serde(default = "default_model_header")]
    model_name_header_key: String,
    #[serde(default = "default_selected_route_header")]
    selected_route_header_key: String,
    #[serde(default = "default_metadata_namespace")]
    metadata_namespace: String,
    #[serde(default)]
    rules: IndexMap<String, RawBackend>,
    #[serde(default)]
    llm_request_costs: Vec<RawRequestCost>,
    #[serde(default)]
    sensitive_headers: Option<Vec<String>>,
    #[serde(default)]
    tick_interval_ms: Option<u64>,
    #[serde(default)]
    uuid: Option<String>,
}

fn default_schema() -> String {
    "v1".to_string()
}
fn default_model_header() -> String {
    "x-ai-eg-model".to_string()
}
fn default_selected_route_header() -> String {
    "x-ai-eg-selected-backend".to_string()
}
fn default_metadata_namespace() -> String {
    "aigateway.envoy.io".to_string()
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawBackend {
    schema: RawBackendSchema,
    #[serde(default)]
    model_name_override: Option<String>,
    #[serde(default)]
    header_mutation: Option<RawHeaderMutation>,
    #[serde(default)]
    body_mutation: Option<RawBodyMutation>,
    #[serde(default)]
    auth: Option<RawAuth>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawBackendSchema {
    family_tag: String,
    #[serde(default)]
    version: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct RawHeaderMutation {
    #[serde(default)]
    set: HashMap<String, String>,
    #[serde(default)]
    remove: Vec<String>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct RawBodyMutation {
    #[serde(default)]
    set: HashMap<String, String>,
    #[serde(default)]
    remove: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", tag = "kind")]
enum RawAuth {
    StaticApiKey { header_name: Option<String>, key: String },
    BearerPassthrough,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawRequestCost {
    kind: String,
    metadata_key: String,
    #[serde(default)]
    cel_program: Option<String>,
}

fn parse_family(tag: &str) -> Result<SchemaFamily, Error> {
    match tag {
        "openai" => Ok(SchemaFamily::OpenAi),
        "bedrock" => Ok(SchemaFamily::Bedrock),
        "azure_openai" | "azureOpenai" | "azureOpenAI" => Ok(SchemaFamily::AzureOpenAi),
        "vertex" => Ok(SchemaFamily::Vertex),
        "anthropic" => Ok(SchemaFamily::Anthropic),
        "cohere" => Ok(SchemaFamily::Cohere),
        other => Err(Error::Invalid(format!("unknown schema family tag: {other}"))),
    }
}

fn lower_request_cost(raw: RawRequestCost) -> Result<RequestCost, Error> {
    let kind = match raw.kind.as_str() {
        "inputToken" => RequestCostKind::InputToken,
        "cachedInputToken" => RequestCostKind::CachedInputToken,
        "outputToken" => RequestCostKind::OutputToken,
        "totalToken" => RequestCostKind::TotalToken,
        "cel" => RequestCostKind::Cel,
        other => return Err(Error::Invalid(format!("unknown request cost kind: {other}"))),
    };
    let cel_program = if kind == RequestCostKind::Cel {
        let source = raw
            .cel_program
            .ok_or_else(|| Error::Invalid(format!("request cost {} kind=cel requires celProgram", raw.metadata_key)))?;
        Some(compile_cel(&source)?)
    } else {
        None
    };
    Ok(RequestCost {
        kind,
        metadata_key: raw.metadata_key,
        cel_program,
    })
}

fn lower_backend(name: String, raw: RawBackend) -> Result<Backend, Error> {
    let header_mutation = raw.header_mutation.map(|h| HeaderMutationConfig {
        set: h.set.into_iter().collect(),
        remove: h.remove,
    });
    let body_mutation = raw.body_mutation.map(|b| BodyMutationConfig {
        set: b.set.into_iter().collect(),
        remove: b.remove,
    });
    let auth = raw.auth.map(|a| match a {
        RawAuth::StaticApiKey { header_name, key } => AuthConfig {
            kind: AuthKind::StaticApiKey,
            header_name: Some(header_name.unwrap_or_else(|| "x-api-key".to_string())),
            key: Some(key),
        },
        RawAuth::BearerPassthrough => AuthConfig {
            kind: AuthKind::BearerPassthrough,
            header_name: None,
            key: None,
        },
    });
    Ok(Backend {
        name: name.clone(),
        schema: BackendSchema {
            family_tag: parse_family(&raw.schema.family_tag)?,
            version: raw.schema.version.unwrap_or_else(|| "v1".to_string()),
        },
        model_name_override: raw.model_name_override,
        header_mutation,
        body_mutation,
        auth,
    })
}

/// Parses a YAML document into a runtime [`Config`], compiling any CEL request-cost
/// programs. This is the only place CEL programs are compiled — never on the hot path.
pub fn parse(contents: &str) -> Result<Config, Error> {
    let raw: RawConfig = serde_yaml::from_str(contents).map_err(|source| Error::Parse {
        path: "<in-memory>".to_string(),
        source,
    })?;

    let mut rules = IndexMap::new();
    for (name, backend) in raw.rules {
        rules.insert(name.clone(), lower_backend(name, backend)?);
    }

    let mut llm_request_costs = Vec::new();
    for raw_cost in raw.llm_request_costs {
        llm_request_costs.push(lower_request_cost(raw_cost)?);
    }

    Ok(Config {
        uuid: raw.uuid.unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
        schema: raw.schema,
        model_name_header_key: raw.model_name_header_key,
        selected_route_header_key: raw.selected_route_header_key,
        metadata_namespace: raw.metadata_namespace,
        rules,
        llm_request_costs,
        sensitive_headers: raw
            .sensitive_headers
            .unwrap_or_else(|| vec!["authorization".to_string()]),
        tick_interval_ms: raw.tick_interval_ms.unwrap_or(1000),
    })
}

/// Loads and parses a config file from disk.
pub fn load_file(path: &std::path::Path) -> Result<Config, Error> {
    let contents = std::fs::read_to_string(path).map_err(|source| Error::Io {
        path: path.display().to_string(),
        source,
    })?;
    parse(&contents).map_err(|err| match err {
        Error::Parse { source, .. } => Error::Parse {
            path: path.display().to_string(),
            source,
        },
        other => other,
    })
}
