//! Transformer catalog
//!
//! Declarative list of `(transformer, content source)` pairs consumed at
//! startup. A missing catalog file means an empty catalog; a present but
//! unparsable one is a configuration error.
//!
//! ```json
//! {
//!   "transformers": [
//!     {
//!       "typeName": "csv-merge",
//!       "contentSource": {
//!         "name": "filesystem",
//!         "config": { "path": "/data/in", "filter": "*.csv" }
//!       }
//!     }
//!   ]
//! }
//! ```

use cflow_common::{FlowError, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use tracing::warn;

/// The catalog document
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Catalog {
    #[serde(default)]
    pub transformers: Vec<CatalogEntry>,
}

/// One transformer/source pairing
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogEntry {
    pub type_name: String,
    pub content_source: CatalogSource,
}

/// The source half of a catalog entry
#[derive(Debug, Clone, Deserialize)]
pub struct CatalogSource {
    pub name: String,
    #[serde(default)]
    pub config: HashMap<String, String>,
}

impl Catalog {
    /// Load the catalog from a JSON file
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        match tokio::fs::read_to_string(path).await {
            Ok(text) => Self::parse(&text),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(path = %path.display(), "no catalog file, starting with an empty catalog");
                Ok(Self::default())
            },
            Err(e) => Err(e.into()),
        }
    }

    /// Parse a catalog from JSON text
    pub fn parse(text: &str) -> Result<Self> {
        serde_json::from_str(text)
            .map_err(|e| FlowError::Configuration(format!("catalog is not valid JSON: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_entry() {
        let catalog = Catalog::parse(
            r#"{
                "transformers": [
                    {
                        "typeName": "csv-merge",
                        "contentSource": {
                            "name": "filesystem",
                            "config": { "path": "/data/in", "filter": "*.csv" }
                        }
                    }
                ]
            }"#,
        )
        .unwrap();

        assert_eq!(catalog.transformers.len(), 1);
        let entry = &catalog.transformers[0];
        assert_eq!(entry.type_name, "csv-merge");
        assert_eq!(entry.content_source.name, "filesystem");
        assert_eq!(entry.content_source.config["path"], "/data/in");
    }

    #[test]
    fn test_parse_defaults_missing_sections() {
        let catalog = Catalog::parse("{}").unwrap();
        assert!(catalog.transformers.is_empty());
    }

    #[test]
    fn test_parse_rejects_malformed_json() {
        assert!(matches!(
            Catalog::parse("{ nope"),
            Err(FlowError::Configuration(_))
        ));
    }

    #[tokio::test]
    async fn test_load_missing_file_is_empty_catalog() {
        let catalog = Catalog::load("/definitely/not/here/catalog.json")
            .await
            .unwrap();
        assert!(catalog.transformers.is_empty());
    }
}
