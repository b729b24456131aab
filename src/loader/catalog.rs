use std::collections::HashMap;
use std::sync::Arc;

use super::ExtensionDescriptor;
use crate::builtin::{EchoExtension, PollExtension};
use crate::extension::{Extension, ExtensionResult};

/// Builds an extension instance for a descriptor.
pub type ExtensionFactory =
    Arc<dyn Fn(&ExtensionDescriptor) -> ExtensionResult<Box<dyn Extension>> + Send + Sync>;

/// Extension types the host can instantiate, keyed by manifest entrypoint.
#[derive(Clone, Default)]
pub struct ExtensionCatalog {
    factories: HashMap<String, ExtensionFactory>,
}

impl ExtensionCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Catalog with the built-in `poll` and `echo` types registered.
    pub fn with_builtins() -> Self {
        let mut catalog = Self::new();
        catalog
            .register(PollExtension::TYPE_NAME, |_| {
                Ok(Box::new(PollExtension::new()) as Box<dyn Extension>)
            })
            .register(EchoExtension::TYPE_NAME, |_| {
                Ok(Box::new(EchoExtension::new()) as Box<dyn Extension>)
            });
        catalog
    }

    /// Registers a factory. A later registration for the same type replaces the earlier one.
    pub fn register<F>(&mut self, type_name: impl Into<String>, factory: F) -> &mut Self
    where
        F: Fn(&ExtensionDescriptor) -> ExtensionResult<Box<dyn Extension>> + Send + Sync + 'static,
    {
        let type_name = type_name.into();
        if self
            .factories
            .insert(type_name.clone(), Arc::new(factory))
            .is_some()
        {
            tracing::debug!(type_name = %type_name, "Replaced extension factory");
        }
        self
    }

    pub fn contains(&self, type_name: &str) -> bool {
        self.factories.contains_key(type_name)
    }

    /// First entrypoint with a registered factory wins.
    pub fn resolve(&self, entrypoints: &[String]) -> Option<(&str, ExtensionFactory)> {
        entrypoints.iter().find_map(|name| {
            self.factories
                .get_key_value(name)
                .map(|(key, factory)| (key.as_str(), factory.clone()))
        })
    }

    pub fn type_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }
}

impl std::fmt::Debug for ExtensionCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExtensionCatalog")
            .field("types", &self.type_names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtins() {
        let catalog = ExtensionCatalog::with_builtins();
        assert!(catalog.contains("poll"));
        assert!(catalog.contains("echo"));
        assert_eq!(catalog.type_names(), vec!["echo", "poll"]);
    }

    #[test]
    fn test_first_registered_entrypoint_wins() {
        let catalog = ExtensionCatalog::with_builtins();
        let entrypoints = vec!["tts".to_string(), "poll".to_string(), "echo".to_string()];
        let (name, _) = catalog.resolve(&entrypoints).unwrap();
        assert_eq!(name, "poll");

        assert!(catalog.resolve(&["tts".to_string()]).is_none());
        assert!(catalog.resolve(&[]).is_none());
    }

    #[test]
    fn test_factory_builds_instance() {
        let catalog = ExtensionCatalog::with_builtins();
        let desc = ExtensionDescriptor::in_process("e");
        let (_, factory) = catalog.resolve(&["echo".to_string()]).unwrap();
        assert!(factory(&desc).is_ok());
    }
}
