//! The AI Gateway `ext_proc` processor library: everything needed to serve Envoy's
//! external processing gRPC protocol for LLM traffic, minus the process bootstrap
//! (binding, signal handling, CLI parsing), which lives in the `aigateway-app` binary.

pub mod auth;
pub mod config;
pub mod decode;
pub mod endpoint;
pub mod error;
pub mod metadata;
pub mod metrics;
pub mod mutate;
pub mod processor;
pub mod registry;
pub mod server;
pub mod session;
pub mod tracing_span;
pub mod translator;
pub mod types;

pub use error::ProcessorError;
pub use server::{GatewayServer, HealthServer};
pub use types::Config;
