//! Header Mutator (spec §4.5): applies a configured list of set/remove operations,
//! restoring the original snapshot on retry so no try leaks a value the previous try
//! removed.

use crate::translator::HeaderMutationOut;
use crate::types::HeaderMutationConfig;

pub struct HeaderMutator {
    config: HeaderMutationConfig,
    original: Vec<(String, String)>,
}

impl HeaderMutator {
    pub fn new(config: HeaderMutationConfig, original_headers: Vec<(String, String)>) -> Self {
        HeaderMutator {
            config,
            original: original_headers,
        }
    }

    /// Applies the configured mutation over `headers` in place, returning the set+remove
    /// pair to append to the translator's own mutation. On retry the headers are first
    /// reset to the original snapshot so restoring never depends on the previous try's
    /// output (the idempotence law in spec §8).
    pub fn apply(&self, headers: &mut Vec<(String, String)>, on_retry: bool) -> HeaderMutationOut {
        if on_retry {
            *headers = self.original.clone();
        }

        let mut out = HeaderMutationOut::default();
        for name in &self.config.remove {
            headers.retain(|(k, _)| !k.eq_ignore_ascii_case(name));
            out.remove.push(name.clone());
        }
        for (name, value) in &self.config.set {
            set_header(headers, name, value);
            out.set.push((name.clone(), value.clone()));
        }
        out
    }
}

fn set_header(headers: &mut Vec<(String, String)>, name: &str, value: &str) {
    if let Some(existing) = headers.iter_mut().find(|(k, _)| k.eq_ignore_ascii_case(name)) {
        existing.1 = value.to_string();
    } else {
        headers.push((name.to_string(), value.to_string()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> HeaderMutationConfig {
        HeaderMutationConfig {
            set: vec![("x-api-key".to_string(), "K".to_string())],
            remove: vec!["authorization".to_string()],
        }
    }

    #[test]
    fn first_try_applies_configured_ops() {
        let mutator = HeaderMutator::new(config(), vec![("authorization".to_string(), "secret".to_string())]);
        let mut headers = vec![("authorization".to_string(), "secret".to_string())];
        let out = mutator.apply(&mut headers, false);
        assert_eq!(out.remove, vec!["authorization".to_string()]);
        assert_eq!(out.set, vec![("x-api-key".to_string(), "K".to_string())]);
        assert!(!headers.iter().any(|(k, _)| k == "authorization"));
    }

    #[test]
    fn retry_restores_original_before_reapplying() {
        let mutator = HeaderMutator::new(config(), vec![("authorization".to_string(), "secret".to_string())]);
        // Simulate try 1's end state: authorization removed, x-api-key added.
        let mut headers = vec![("x-api-key".to_string(), "K".to_string())];
        let out = mutator.apply(&mut headers, true);
        assert_eq!(out.remove, vec!["authorization".to_string()]);
        assert_eq!(out.set, vec![("x-api-key".to_string(), "K".to_string())]);
        assert!(!headers.iter().any(|(k, _)| k == "authorization"));
        assert!(headers.iter().any(|(k, v)| k == "x-api-key" && v == "K"));
    }
}
