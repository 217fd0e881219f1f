//! The request-id to Router Processor correlation table: the router stream writes an
//! entry on its first message and removes it when its stream ends; the upstream stream
//! reads it exactly once, when its own first message (`SetBackend`) arrives carrying the
//! same request id in its Attributes.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::Mutex;

use crate::processor::router::RouterProcessor;

pub type RouterHandle = Arc<Mutex<RouterProcessor>>;

/// A late upstream lookup can race the router stream's own end-of-stream cleanup; that
/// is expected (spec §5) and surfaces to the caller as a plain `None`, which the server
/// turns into an `INTERNAL` status rather than treating it as a bug.
#[derive(Default)]
pub struct SessionTable {
    routers: RwLock<HashMap<String, RouterHandle>>,
}

impl SessionTable {
    pub fn new() -> Self {
        SessionTable::default()
    }

    pub fn register(&self, request_id: String, router: RouterHandle) {
        self.routers.write().insert(request_id, router);
    }

    pub fn lookup(&self, request_id: &str) -> Option<RouterHandle> {
        self.routers.read().get(request_id).cloned()
    }

    pub fn remove(&self, request_id: &str) {
        self.routers.write().remove(request_id);
    }

    pub fn len(&self) -> usize {
        self.routers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoint::EndpointKind;
    use crate::tracing_span::{Tracer, TracerConfig};
    use crate::types::Config;

    fn router_handle() -> RouterHandle {
        let tracer = Arc::new(Tracer::new(&TracerConfig::default()).unwrap());
        Arc::new(Mutex::new(RouterProcessor::new(
            EndpointKind::ChatCompletions,
            Arc::new(Config::default_config()),
            tracer,
            "/v1/chat/completions".to_string(),
            vec![],
        )))
    }

    #[test]
    fn register_lookup_remove_round_trip() {
        let table = SessionTable::new();
        table.register("req-1".to_string(), router_handle());
        assert!(table.lookup("req-1").is_some());
        table.remove("req-1");
        assert!(table.lookup("req-1").is_none());
    }

    #[test]
    fn unknown_request_id_is_none_not_a_panic() {
        let table = SessionTable::new();
        assert!(table.lookup("never-registered").is_none());
    }
}
