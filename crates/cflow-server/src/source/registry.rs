//! Content source registry
//!
//! Maps catalog names to constructor functions. Entries are registered
//! explicitly at process startup; the pipeline only depends on the lookup
//! contract, not on how entries got there.

use cflow_common::{FlowError, Result};
use std::collections::HashMap;
use std::sync::Arc;

use super::{ContentSource, FileSystemContentSource, FtpContentSource};

type SourceBuilder = Box<dyn Fn() -> Arc<dyn ContentSource> + Send + Sync>;

/// Name → constructor table for content sources
pub struct SourceRegistry {
    builders: HashMap<String, SourceBuilder>,
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self { builders: HashMap::new() }
    }

    /// Registry with the two production sources registered
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register("filesystem", || Arc::new(FileSystemContentSource::new()));
        registry.register("ftp", || Arc::new(FtpContentSource::new()));
        registry
    }

    /// Register a constructor under a case-insensitive name
    pub fn register<F>(&mut self, name: &str, builder: F)
    where
        F: Fn() -> Arc<dyn ContentSource> + Send + Sync + 'static,
    {
        self.builders.insert(name.to_lowercase(), Box::new(builder));
    }

    /// Build a fresh, uninitialized source instance
    pub fn build(&self, name: &str) -> Result<Arc<dyn ContentSource>> {
        let builder = self.builders.get(&name.to_lowercase()).ok_or_else(|| {
            FlowError::Configuration(format!("the content source '{}' is not registered", name))
        })?;
        Ok(builder())
    }
}

impl Default for SourceRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_resolve_case_insensitively() {
        let registry = SourceRegistry::with_defaults();
        assert_eq!(registry.build("FileSystem").unwrap().kind(), "FileSystem");
        assert_eq!(registry.build("FTP").unwrap().kind(), "Ftp");
    }

    #[test]
    fn test_unknown_name_is_a_configuration_error() {
        let registry = SourceRegistry::with_defaults();
        assert!(matches!(
            registry.build("imap"),
            Err(FlowError::Configuration(_))
        ));
    }

    #[test]
    fn test_build_returns_fresh_instances() {
        let registry = SourceRegistry::with_defaults();
        let a = registry.build("filesystem").unwrap();
        let b = registry.build("filesystem").unwrap();
        assert!(!Arc::ptr_eq(&a, &b));
    }
}
