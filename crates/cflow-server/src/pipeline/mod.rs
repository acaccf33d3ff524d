//! Transformer processors and the ingestion orchestrator
//!
//! The orchestrator owns one [`TransformerProcessor`] per catalog entry,
//! keyed by binding id. Each processor couples one transformer to one
//! configured source: it takes the source's event receiver, spawns the
//! consuming worker, and starts the source. From then on every observed item
//! is read, stored (deduplicated), and archived, with per-item failures
//! isolated so one bad file never stalls the rest of a batch or the source.
//!
//! Transform-on-demand runs through the orchestrator: look up the processor,
//! load the binding's stored content, invoke the transformer, hand the
//! artifact back to the source's output location and to the caller.

pub mod catalog;

pub use catalog::{Catalog, CatalogEntry, CatalogSource};

use cflow_common::{FlowError, Result};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::source::{ContentSource, SourceBatch, SourceRegistry};
use crate::store::{ContentStore, TransformerBinding};
use crate::transform::{ContentTransformer, TransformOutput, TransformerRegistry};

/// One transformer bound to one running content source
pub struct TransformerProcessor {
    binding: TransformerBinding,
    transformer: Arc<dyn ContentTransformer>,
    source: Arc<dyn ContentSource>,
    store: Arc<ContentStore>,
    worker: Option<JoinHandle<()>>,
}

impl TransformerProcessor {
    /// Subscribe to the source, spawn the consuming worker, start the source
    pub async fn spawn(
        transformer: Arc<dyn ContentTransformer>,
        source: Arc<dyn ContentSource>,
        store: Arc<ContentStore>,
        binding: TransformerBinding,
    ) -> Result<Self> {
        let events = source.take_events().await.ok_or_else(|| {
            FlowError::Lifecycle(format!(
                "source events for binding {} already taken",
                binding.id
            ))
        })?;

        let worker = tokio::spawn(consume_batches(
            events,
            Arc::clone(&source),
            Arc::clone(&store),
            binding.id,
        ));
        source.start().await?;

        Ok(Self {
            binding,
            transformer,
            source,
            store,
            worker: Some(worker),
        })
    }

    pub fn binding(&self) -> &TransformerBinding {
        &self.binding
    }

    /// Transform everything stored for this binding into one artifact
    ///
    /// The artifact is written back to the source's output location and
    /// returned for delivery to the caller.
    pub async fn transform(&self) -> Result<TransformOutput> {
        let contents = self.store.contents(self.binding.id).await?;
        info!(
            binding_id = self.binding.id,
            transformer = self.transformer.type_name(),
            inputs = contents.len(),
            "transforming stored content"
        );

        let output = self
            .transformer
            .transform(&contents)
            .await
            .map_err(|e| FlowError::Transform(e.to_string()))?;

        self.source.output(&output.file_name(), &output.bytes).await?;
        Ok(output)
    }

    /// Pause and dispose the source, then wait for the worker to drain
    pub async fn shutdown(&mut self) {
        if let Err(e) = self.source.pause().await {
            debug!(binding_id = self.binding.id, error = %e, "source not pausable at shutdown");
        }
        self.source.dispose().await;
        if let Some(worker) = self.worker.take() {
            let _ = worker.await;
        }
        debug!(binding_id = self.binding.id, "processor stopped");
    }
}

/// Worker loop: read, store, archive every item of every batch
///
/// Archiving runs whether or not the content was a duplicate, so a duplicate
/// never blocks the source's forward progress. Failures are per-item: logged,
/// skipped, and the rest of the batch continues.
async fn consume_batches(
    mut events: mpsc::Receiver<SourceBatch>,
    source: Arc<dyn ContentSource>,
    store: Arc<ContentStore>,
    binding_id: i64,
) {
    while let Some(batch) = events.recv().await {
        debug!(binding_id, items = batch.len(), "processing batch");
        for item in batch {
            let bytes = match source.read(&item).await {
                Ok(bytes) => bytes,
                Err(e) => {
                    warn!(binding_id, locator = %item.locator, error = %e, "read failed, skipping item");
                    continue;
                },
            };

            if let Err(e) = store.add_content(binding_id, &bytes).await {
                warn!(binding_id, locator = %item.locator, error = %e, "store failed, leaving item in place");
                continue;
            }

            if let Err(e) = source.archive(&item).await {
                warn!(binding_id, locator = %item.locator, error = %e, "archive failed");
            }
        }
    }
    debug!(binding_id, "processor worker stopped");
}

/// Owns the processors built from the catalog
pub struct IngestionOrchestrator {
    store: Arc<ContentStore>,
    processors: RwLock<HashMap<i64, TransformerProcessor>>,
}

impl IngestionOrchestrator {
    /// Build and start one processor per catalog entry
    ///
    /// Resolution failures are fatal: nothing starts unless every entry
    /// resolves.
    pub async fn bootstrap(
        catalog: Catalog,
        sources: &SourceRegistry,
        transformers: &TransformerRegistry,
        store: Arc<ContentStore>,
    ) -> Result<Self> {
        let mut processors = HashMap::new();

        for entry in &catalog.transformers {
            let transformer = transformers.resolve(&entry.type_name)?;
            if entry.content_source.name.is_empty() {
                return Err(FlowError::Configuration(format!(
                    "the transformer '{}' does not have any content source",
                    entry.type_name
                )));
            }

            let source = sources.build(&entry.content_source.name)?;
            source.init(entry.content_source.config.clone()).await?;
            let identity = source.identity().await?;

            let binding = store
                .get_or_create_binding(transformer.type_name(), &identity)
                .await?;
            if processors.contains_key(&binding.id) {
                return Err(FlowError::Configuration(format!(
                    "duplicate catalog entry for binding {} ({})",
                    binding.id, identity
                )));
            }

            info!(
                binding_id = binding.id,
                transformer = transformer.type_name(),
                identity = %identity,
                "starting processor"
            );
            let processor =
                TransformerProcessor::spawn(transformer, source, Arc::clone(&store), binding.clone())
                    .await?;
            processors.insert(binding.id, processor);
        }

        info!(processors = processors.len(), "orchestrator ready");
        Ok(Self {
            store,
            processors: RwLock::new(processors),
        })
    }

    /// All persisted bindings, load-ordered
    pub async fn bindings(&self) -> Result<Vec<TransformerBinding>> {
        self.store.bindings().await
    }

    /// Transform all stored content for one binding
    ///
    /// Fails with the not-found error if no processor is registered for the
    /// id.
    pub async fn transform(&self, binding_id: i64) -> Result<TransformOutput> {
        let processors = self.processors.read().await;
        let processor = processors.get(&binding_id).ok_or_else(|| {
            FlowError::NotFound(format!("no processor registered for binding {}", binding_id))
        })?;
        processor.transform().await
    }

    /// Pause and dispose every processor's source in turn
    pub async fn shutdown(&self) {
        let mut processors = self.processors.write().await;
        for (_, mut processor) in processors.drain() {
            processor.shutdown().await;
        }
        info!("orchestrator stopped");
    }
}
