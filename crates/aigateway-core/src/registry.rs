//! The endpoint registry: resolves the `:path` pseudo-header on the first
//! `RequestHeaders` message of a stream to the [`EndpointKind`] that will process it.

use crate::endpoint::EndpointKind;
use crate::error::ProcessorError;

#[derive(Default)]
pub struct Registry;

impl Registry {
    pub fn new() -> Self {
        Registry
    }

    pub fn resolve(&self, path: &str) -> Result<EndpointKind, ProcessorError> {
        EndpointKind::from_path(path).ok_or_else(|| ProcessorError::NotFound(path.to_string()))
    }
}
