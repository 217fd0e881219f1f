//! Cost metadata assembly (spec §4.6) and the CEL glue that keeps the rest of the
//! codebase from touching the CEL crate directly.
//!
//! The CEL evaluator's internals are an external collaborator; `CostProgram` is the
//! narrow seam we depend on it through. Programs are precompiled at config-load time
//! and never recompiled on the hot path.

use std::collections::HashMap;
use std::sync::Arc;

use prost_wkt_types::value::Kind;
use prost_wkt_types::{Struct, Value as WktValue};

use crate::error::ProcessorError;
use crate::types::{CostVars, RequestCost, RequestCostKind};

/// A precompiled CEL program, evaluated against the four accounting variables plus
/// `model`/`backend`. Implementors coerce the result to an unsigned 32-bit integer.
pub trait CostProgram: Send + Sync {
    fn eval(&self, vars: &CostVars) -> Result<u32, ProcessorError>;
}

pub struct CelCostProgram {
    source: String,
    program: cel_interpreter::Program,
}

impl CelCostProgram {
    pub fn compile(source: &str) -> Result<Self, ProcessorError> {
        let program = cel_interpreter::Program::compile(source)
            .map_err(|e| ProcessorError::CelError(format!("{source}: {e}")))?;
        Ok(CelCostProgram {
            source: source.to_string(),
            program,
        })
    }
}

impl CostProgram for CelCostProgram {
    fn eval(&self, vars: &CostVars) -> Result<u32, ProcessorError> {
        let mut ctx = cel_interpreter::Context::default();
        for (k, v) in vars.as_map() {
            ctx.add_variable_from_value(k, v);
        }
        let value = self
            .program
            .execute(&ctx)
            .map_err(|e| ProcessorError::CelError(format!("{}: {e}", self.source)))?;
        match value {
            cel_interpreter::Value::UInt(n) => Ok(n as u32),
            cel_interpreter::Value::Int(n) => Ok(n as u32),
            cel_interpreter::Value::Float(f) => Ok(f as u32),
            other => Err(ProcessorError::CelError(format!(
                "cel program {} returned non-numeric value: {other:?}",
                self.source
            ))),
        }
    }
}

/// Final per-request counters plus the streaming-only latency figures, used to build
/// the dynamic-metadata namespace at end-of-stream.
#[derive(Clone, Debug, Default)]
pub struct CostSnapshot {
    pub model: String,
    pub backend: String,
    pub input: u32,
    pub cached_input: u32,
    pub output: u32,
    pub total: u32,
    pub token_latency_ttft_ms: Option<f64>,
    pub token_latency_itl_ms: Option<f64>,
}

/// Builds the `aigateway.envoy.io` dynamic-metadata `Struct` per spec §4.6. Callers
/// namespace the result under the configured key (see `processor::wire::metadata_of`).
pub fn build_dynamic_metadata(costs: &[RequestCost], snapshot: &CostSnapshot) -> Result<Struct, ProcessorError> {
    let mut fields: HashMap<String, WktValue> = HashMap::new();

    for cost in costs {
        let number = match cost.kind {
            RequestCostKind::InputToken => snapshot.input,
            RequestCostKind::CachedInputToken => snapshot.cached_input,
            RequestCostKind::OutputToken => snapshot.output,
            RequestCostKind::TotalToken => snapshot.total,
            RequestCostKind::Cel => {
                let program = cost.cel_program.as_ref().ok_or_else(|| {
                    ProcessorError::CelError(format!(
                        "request cost {} declared kind=cel with no compiled program",
                        cost.metadata_key
                    ))
                })?;
                let vars = CostVars {
                    model: snapshot.model.clone(),
                    backend: snapshot.backend.clone(),
                    input: snapshot.input,
                    cached_input: snapshot.cached_input,
                    output: snapshot.output,
                    total: snapshot.total,
                };
                program.eval(&vars)?
            }
        };
        fields.insert(cost.metadata_key.clone(), number_value(number as f64));
    }

    fields.insert("model_name_override".to_string(), string_value(&snapshot.model));
    fields.insert("backend_name".to_string(), string_value(&snapshot.backend));

    if let Some(ttft) = snapshot.token_latency_ttft_ms {
        fields.insert("token_latency_ttft".to_string(), number_value(ttft));
    }
    if let Some(itl) = snapshot.token_latency_itl_ms {
        fields.insert("token_latency_itl".to_string(), number_value(itl));
    }

    Ok(Struct { fields })
}

fn number_value(n: f64) -> WktValue {
    WktValue {
        kind: Some(Kind::NumberValue(n)),
    }
}

fn string_value(s: &str) -> WktValue {
    WktValue {
        kind: Some(Kind::StringValue(s.to_string())),
    }
}

/// Builds the inner `content_length` struct — the workaround noted in spec §4.3 step 6:
/// `CONTINUE_AND_REPLACE` strips `content-length`. Callers namespace this themselves
/// (see `processor::wire::metadata_of`) before attaching it as dynamic metadata.
pub fn content_length_struct(len: usize) -> Struct {
    let mut fields = HashMap::new();
    fields.insert("content_length".to_string(), number_value(len as f64));
    Struct { fields }
}

pub fn compile_cel(source: &str) -> Result<Arc<dyn CostProgram>, ProcessorError> {
    Ok(Arc::new(CelCostProgram::compile(source)?))
}
