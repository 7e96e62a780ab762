use super::{Registry, RegistryEntry, RegistryError};
use parking_lot::Mutex;
use std::collections::HashMap;

#[derive(Debug, Default)]
struct Inner {
    by_identity: HashMap<String, RegistryEntry>,
    /// token -> identity
    by_token: HashMap<String, String>,
}

/// In-process registry. Both indexes live behind one lock so an upsert and
/// the removal of the superseded token are a single step.
#[derive(Debug, Default)]
pub struct MemoryRegistry {
    inner: Mutex<Inner>,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().by_identity.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Registry for MemoryRegistry {
    fn upsert(&self, entry: RegistryEntry) -> Result<(), RegistryError> {
        let mut inner = self.inner.lock();
        if let Some(previous) = inner.by_identity.remove(&entry.identity) {
            inner.by_token.remove(&previous.token);
        }
        // A token reused under another identity would leave a dangling entry.
        if let Some(owner) = inner.by_token.remove(&entry.token) {
            inner.by_identity.remove(&owner);
        }
        inner
            .by_token
            .insert(entry.token.clone(), entry.identity.clone());
        inner.by_identity.insert(entry.identity.clone(), entry);
        Ok(())
    }

    fn find_by_token(&self, token: &str) -> Result<Option<RegistryEntry>, RegistryError> {
        let inner = self.inner.lock();
        Ok(inner
            .by_token
            .get(token)
            .and_then(|identity| inner.by_identity.get(identity))
            .cloned())
    }

    fn find_by_identity(&self, identity: &str) -> Result<Option<RegistryEntry>, RegistryError> {
        Ok(self.inner.lock().by_identity.get(identity).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn entry(identity: &str, token: &str) -> RegistryEntry {
        let at = Utc.with_ymd_and_hms(2026, 10, 1, 12, 0, 0).unwrap();
        RegistryEntry {
            identity: identity.into(),
            token: token.into(),
            image_reference: format!("{token}.png"),
            created_at: at,
            last_reset_at: at,
        }
    }

    #[test]
    fn upsert_and_lookup_both_ways() {
        let registry = MemoryRegistry::new();
        registry.upsert(entry("a@example.com", "t1")).unwrap();

        let by_token = registry.find_by_token("t1").unwrap().unwrap();
        assert_eq!(by_token.identity, "a@example.com");
        let by_identity = registry.find_by_identity("a@example.com").unwrap().unwrap();
        assert_eq!(by_identity.token, "t1");
        assert!(registry.find_by_token("missing").unwrap().is_none());
    }

    #[test]
    fn upsert_supersedes_prior_token() {
        let registry = MemoryRegistry::new();
        registry.upsert(entry("a@example.com", "t1")).unwrap();
        registry.upsert(entry("a@example.com", "t2")).unwrap();

        assert_eq!(registry.len(), 1);
        assert!(registry.find_by_token("t1").unwrap().is_none());
        assert_eq!(
            registry.find_by_identity("a@example.com").unwrap().unwrap().token,
            "t2"
        );
    }

    #[test]
    fn identities_are_independent() {
        let registry = MemoryRegistry::new();
        registry.upsert(entry("a@example.com", "t1")).unwrap();
        registry.upsert(entry("b@example.com", "t2")).unwrap();
        assert_eq!(registry.len(), 2);
        assert_eq!(
            registry.find_by_token("t1").unwrap().unwrap().identity,
            "a@example.com"
        );
    }
}
