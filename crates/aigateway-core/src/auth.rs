//! Backend Auth Handler (spec §1 non-goal, §4.3 step 5): the hook a real credential
//! provider (SigV4, Azure AD, GCP service account) would plug into. Only two
//! illustrative implementations are provided here, enough to exercise the hook.

use bytes::Bytes;

use crate::error::ProcessorError;
use crate::types::{AuthConfig, AuthKind};

pub trait BackendAuthHandler: Send + Sync {
    /// May append/overwrite headers and optionally rewrite the body. Returning `None`
    /// for the body means "leave it as the mutators produced it".
    fn apply(&self, headers: &mut Vec<(String, String)>, body: &Bytes) -> Result<Option<Bytes>, ProcessorError>;
}

pub struct StaticApiKeyAuth {
    header_name: String,
    key: String,
}

impl StaticApiKeyAuth {
    pub fn new(header_name: String, key: String) -> Self {
        StaticApiKeyAuth { header_name, key }
    }
}

impl BackendAuthHandler for StaticApiKeyAuth {
    fn apply(&self, headers: &mut Vec<(String, String)>, _body: &Bytes) -> Result<Option<Bytes>, ProcessorError> {
        if let Some(existing) = headers.iter_mut().find(|(k, _)| k.eq_ignore_ascii_case(&self.header_name)) {
            existing.1 = self.key.clone();
        } else {
            headers.push((self.header_name.clone(), self.key.clone()));
        }
        Ok(None)
    }
}

/// Forwards whatever `authorization` header the client already sent untouched. Useful
/// for backends that accept the client's own bearer token directly.
pub struct BearerPassthroughAuth;

impl BackendAuthHandler for BearerPassthroughAuth {
    fn apply(&self, _headers: &mut Vec<(String, String)>, _body: &Bytes) -> Result<Option<Bytes>, ProcessorError> {
        Ok(None)
    }
}

pub fn make_auth_handler(config: Option<&AuthConfig>) -> Option<Box<dyn BackendAuthHandler>> {
    let config = config?;
    match config.kind {
        AuthKind::StaticApiKey => Some(Box::new(StaticApiKeyAuth::new(
            config.header_name.clone().unwrap_or_else(|| "x-api-key".to_string()),
            config.key.clone().unwrap_or_default(),
        ))),
        AuthKind::BearerPassthrough => Some(Box::new(BearerPassthroughAuth)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn static_api_key_sets_header() {
        let auth = StaticApiKeyAuth::new("x-api-key".to_string(), "secret".to_string());
        let mut headers = Vec::new();
        auth.apply(&mut headers, &Bytes::new()).unwrap();
        assert_eq!(headers, vec![("x-api-key".to_string(), "secret".to_string())]);
    }

    #[test]
    fn bearer_passthrough_is_a_no_op() {
        let auth = BearerPassthroughAuth;
        let mut headers = vec![("authorization".to_string(), "Bearer abc".to_string())];
        let result = auth.apply(&mut headers, &Bytes::new()).unwrap();
        assert!(result.is_none());
        assert_eq!(headers, vec![("authorization".to_string(), "Bearer abc".to_string())]);
    }
}
