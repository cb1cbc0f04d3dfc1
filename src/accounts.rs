use std::collections::HashMap;

use crate::types::OwnerId;

/// Maps caller credentials to the owner they act for.
///
/// Credential issuance lives outside this service; implementations only
/// look credentials up.
pub trait AccountDirectory: Send + Sync {
    fn resolve(&self, credential: &str) -> Option<OwnerId>;
}

/// Fixed credential table, typically loaded from configuration.
#[derive(Debug, Clone, Default)]
pub struct StaticAccounts {
    credentials: HashMap<String, OwnerId>,
}

impl StaticAccounts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_account(mut self, credential: impl Into<String>, owner: impl Into<String>) -> Self {
        self.credentials
            .insert(credential.into(), OwnerId::new(owner));
        self
    }

    pub fn len(&self) -> usize {
        self.credentials.len()
    }

    pub fn is_empty(&self) -> bool {
        self.credentials.is_empty()
    }
}

impl AccountDirectory for StaticAccounts {
    fn resolve(&self, credential: &str) -> Option<OwnerId> {
        self.credentials.get(credential).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_known_credentials_only() {
        let accounts = StaticAccounts::new()
            .with_account("key-a", "acct-a")
            .with_account("key-b", "acct-b");
        assert_eq!(accounts.resolve("key-a"), Some(OwnerId::new("acct-a")));
        assert_eq!(accounts.resolve("key-c"), None);
        assert_eq!(accounts.len(), 2);
    }
}
