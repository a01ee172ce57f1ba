//! Credential lookup from the process environment.

use pipeline::{CallerId, Credential, CredentialResolver};

/// Reads the API key from one environment variable for every caller.
#[derive(Debug, Clone)]
pub struct EnvCredentials {
    var: String,
}

impl EnvCredentials {
    pub fn new(var: impl Into<String>) -> Self {
        Self { var: var.into() }
    }
}

impl CredentialResolver for EnvCredentials {
    fn resolve_credential(&self, _caller: &CallerId) -> Option<Credential> {
        std::env::var(&self.var).ok().and_then(Credential::new)
    }
}
