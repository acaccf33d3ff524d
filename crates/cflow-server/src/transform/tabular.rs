//! CSV merge transformer
//!
//! Treats each stored content as a CSV document with a header row and merges
//! the record rows of every document into one artifact. The first document's
//! header wins; unreadable documents are skipped with a warning rather than
//! failing the whole transform.

use async_trait::async_trait;
use cflow_common::{FlowError, Result};
use futures::future::try_join_all;
use tracing::warn;

use super::{ContentTransformer, TransformOutput};
use crate::store::StoredContent;

const OUTPUT_NAME: &str = "merged";
const OUTPUT_EXTENSION: &str = ".csv";
const OUTPUT_MIME_TYPE: &str = "text/csv";

/// Merges stored CSV payloads into a single CSV artifact
pub struct CsvMergeTransformer;

impl CsvMergeTransformer {
    pub const TYPE_NAME: &'static str = "csv-merge";

    pub fn new() -> Self {
        Self
    }
}

impl Default for CsvMergeTransformer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ContentTransformer for CsvMergeTransformer {
    fn type_name(&self) -> &'static str {
        Self::TYPE_NAME
    }

    async fn transform(&self, contents: &[StoredContent]) -> Result<TransformOutput> {
        let payloads = try_join_all(contents.iter().map(|c| c.load())).await?;

        let mut writer = csv::Writer::from_writer(Vec::new());
        let mut header_written = false;

        for (content, payload) in contents.iter().zip(payloads.iter()) {
            let mut reader = csv::ReaderBuilder::new()
                .flexible(true)
                .from_reader(payload.as_slice());

            let header = match reader.headers() {
                Ok(header) => header.clone(),
                Err(e) => {
                    warn!(content_id = content.id, error = %e, "skipping unreadable content");
                    continue;
                },
            };
            if !header_written {
                writer
                    .write_record(&header)
                    .map_err(|e| FlowError::Transform(e.to_string()))?;
                header_written = true;
            }

            for record in reader.records() {
                match record {
                    Ok(record) => writer
                        .write_record(&record)
                        .map_err(|e| FlowError::Transform(e.to_string()))?,
                    Err(e) => {
                        warn!(content_id = content.id, error = %e, "skipping unreadable record");
                    },
                }
            }
        }

        let bytes = writer
            .into_inner()
            .map_err(|e| FlowError::Transform(e.to_string()))?;

        Ok(TransformOutput {
            name: OUTPUT_NAME.to_string(),
            extension: OUTPUT_EXTENSION.to_string(),
            mime_type: OUTPUT_MIME_TYPE.to_string(),
            bytes,
        })
    }
}
