//! Content transformer contract and registry
//!
//! A transformer turns the stored content of one binding into a derived
//! artifact. Implementations are interchangeable; the catalog names one per
//! binding and the registry resolves that name at startup. An unresolvable
//! name is a fatal bootstrap error.

pub mod tabular;

pub use tabular::CsvMergeTransformer;

use async_trait::async_trait;
use cflow_common::{FlowError, Result};
use std::collections::HashMap;
use std::sync::Arc;

use crate::store::StoredContent;

/// A derived artifact ready for delivery
#[derive(Debug, Clone)]
pub struct TransformOutput {
    pub name: String,
    /// File extension including the leading dot, e.g. `".csv"`
    pub extension: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

impl TransformOutput {
    pub fn file_name(&self) -> String {
        format!("{}{}", self.name, self.extension)
    }
}

/// Contract every transformer implements
#[async_trait]
pub trait ContentTransformer: Send + Sync {
    /// Stable type name recorded in bindings and matched against the catalog
    fn type_name(&self) -> &'static str;

    /// Produce one artifact from all stored content of a binding
    ///
    /// An empty input sequence is valid and yields a well-formed, possibly
    /// empty artifact.
    async fn transform(&self, contents: &[StoredContent]) -> Result<TransformOutput>;
}

/// Type name → transformer instance table
///
/// Transformers are stateless, so one shared instance per type is enough.
pub struct TransformerRegistry {
    transformers: HashMap<String, Arc<dyn ContentTransformer>>,
}

impl TransformerRegistry {
    pub fn new() -> Self {
        Self { transformers: HashMap::new() }
    }

    /// Registry with the stock transformers registered
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(CsvMergeTransformer::new()));
        registry
    }

    pub fn register(&mut self, transformer: Arc<dyn ContentTransformer>) {
        self.transformers
            .insert(transformer.type_name().to_lowercase(), transformer);
    }

    /// Resolve a catalog type name to its transformer
    pub fn resolve(&self, type_name: &str) -> Result<Arc<dyn ContentTransformer>> {
        self.transformers
            .get(&type_name.to_lowercase())
            .cloned()
            .ok_or_else(|| {
                FlowError::Configuration(format!("the transformer '{}' was not found", type_name))
            })
    }
}

impl Default for TransformerRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_is_case_insensitive() {
        let registry = TransformerRegistry::with_defaults();
        assert!(registry.resolve("Csv-Merge").is_ok());
    }

    #[test]
    fn test_unknown_type_name_is_fatal_configuration() {
        let registry = TransformerRegistry::with_defaults();
        assert!(matches!(
            registry.resolve("spreadsheet"),
            Err(FlowError::Configuration(_))
        ));
    }

    #[test]
    fn test_file_name_joins_name_and_extension() {
        let output = TransformOutput {
            name: "merged".to_string(),
            extension: ".csv".to_string(),
            mime_type: "text/csv".to_string(),
            bytes: Vec::new(),
        };
        assert_eq!(output.file_name(), "merged.csv");
    }
}
