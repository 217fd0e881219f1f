//! The two processor roles a gRPC stream can take on (spec §4.1): a Router Processor,
//! which owns one inbound request end-to-end, and an Upstream Processor, which owns one
//! try against one selected backend. Both are driven by the Stream Server.

pub mod router;
pub mod upstream;
pub mod wire;

/// Which role a stream was opened for, decided once from its first `RequestHeaders`
/// message: a stream carrying a populated `attributes` map (Envoy's routed-backend
/// metadata) is an upstream try; otherwise it is the router for a fresh request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StreamRole {
    Router,
    Upstream,
}

pub fn stream_role(attributes_present: bool) -> StreamRole {
    if attributes_present {
        StreamRole::Upstream
    } else {
        StreamRole::Router
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_follows_attribute_presence() {
        assert_eq!(stream_role(false), StreamRole::Router);
        assert_eq!(stream_role(true), StreamRole::Upstream);
    }
}
