//! Per-process provider registry.
//!
//! Maps provider names to implementations. The registry is read-mostly:
//! built once at startup, shared behind `Arc`.

use crate::error::CognitionError;
use crate::ports::{CognitionProvider, NONE_PROVIDER};
use std::collections::HashMap;
use std::sync::Arc;

/// Registry of cognition providers by name.
#[derive(Default)]
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn CognitionProvider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a provider under a name. Later registrations win.
    pub fn register(&mut self, name: impl Into<String>, provider: Arc<dyn CognitionProvider>) {
        self.providers.insert(name.into(), provider);
    }

    /// Resolve a provider.
    ///
    /// Returns `Ok(None)` for the `none` sentinel (cognition skipped),
    /// `Err(UnknownProvider)` for a name nobody registered.
    pub fn resolve(
        &self,
        name: &str,
    ) -> Result<Option<Arc<dyn CognitionProvider>>, CognitionError> {
        if name == NONE_PROVIDER {
            return Ok(None);
        }
        self.providers
            .get(name)
            .cloned()
            .map(Some)
            .ok_or_else(|| CognitionError::UnknownProvider(name.to_string()))
    }

    pub fn names(&self) -> Vec<&str> {
        self.providers.keys().map(String::as_str).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stub::StubCognition;

    #[test]
    fn test_none_sentinel_resolves_to_nothing() {
        let registry = ProviderRegistry::new();
        assert!(registry.resolve("none").unwrap().is_none());
    }

    #[test]
    fn test_unknown_provider_is_an_error() {
        let registry = ProviderRegistry::new();
        assert!(matches!(
            registry.resolve("missing"),
            Err(CognitionError::UnknownProvider(_))
        ));
    }

    #[test]
    fn test_registered_provider_resolves() {
        let mut registry = ProviderRegistry::new();
        registry.register("stub", Arc::new(StubCognition::new(5)));
        assert!(registry.resolve("stub").unwrap().is_some());
    }
}
