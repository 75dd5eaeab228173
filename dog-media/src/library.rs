use std::sync::Arc;

use crate::codec::{ImageCodec, RasterCodec};
use crate::config::MediaConfig;
use crate::events::{EventSink, NoopEvents};
use crate::inventory::{inspect, LogInventory};
use crate::keys::{KeyResolver, StorageKey};
use crate::processor::{ProcessOutcome, UploadRequest, VariantProcessor};
use crate::reconcile::{PruneOutcome, ReconcileReport, ReconciliationEngine};
use crate::repository::{EntityStore, MemoryEntityStore, MemoryUploadLogStore, UploadLogStore};
use crate::store::{DiskRegistry, MediaDisk};
use crate::{EntityId, LogId, MediaError, MediaResult, OwningEntity, SlotKey, UploadSource};

/// The media service applications embed: uploads, removals and the upload library
#[derive(Clone)]
pub struct MediaLibrary {
    config: MediaConfig,
    disk: Arc<dyn MediaDisk>,
    logs: Arc<dyn UploadLogStore>,
    entities: Arc<dyn EntityStore>,
    processor: VariantProcessor,
    engine: ReconciliationEngine,
    resolver: KeyResolver,
}

impl MediaLibrary {
    pub fn builder(config: MediaConfig) -> MediaLibraryBuilder {
        MediaLibraryBuilder::new(config)
    }

    pub fn config(&self) -> &MediaConfig {
        &self.config
    }

    pub fn disk(&self) -> &Arc<dyn MediaDisk> {
        &self.disk
    }

    pub fn processor(&self) -> &VariantProcessor {
        &self.processor
    }

    pub fn engine(&self) -> &ReconciliationEngine {
        &self.engine
    }

    /// Stand-alone upload; variants are logged but attached to nothing
    pub async fn upload(&self, request: UploadRequest) -> MediaResult<ProcessOutcome> {
        self.processor.process(request).await
    }

    /// Upload a featured image for `entity` and point its columns at the new variants.
    ///
    /// With no slots requested every configured size is rendered. Columns that
    /// already held a filename are overwritten; the old files stay where they are.
    pub async fn upload_for_entity(
        &self,
        entity: &mut OwningEntity,
        mut request: UploadRequest,
    ) -> MediaResult<ProcessOutcome> {
        let entity_slots = self.config.entity_slots();
        if request.slots.is_empty() {
            request = request.with_slots(entity_slots.iter().cloned());
        }
        request = request
            .with_source(UploadSource::BlogFeaturedImage)
            .for_entity(entity.id.clone());

        let outcome = self.processor.process(request).await?;

        let mut working = entity.clone();
        let mut changed = false;
        for (slot, variant) in &outcome.variants {
            if entity_slots.contains(slot) {
                working.set_image(slot.clone(), variant.filename.clone());
                changed = true;
            }
        }
        if changed {
            self.entities.save(&working).await?;
            *entity = working;
        }
        Ok(outcome)
    }

    /// Remove every configured image slot of `entity`
    pub async fn remove_entity_images(
        &self,
        entity: &mut OwningEntity,
    ) -> MediaResult<ReconcileReport> {
        let slots = self.config.entity_slots();
        self.engine.reconcile(entity, &slots).await
    }

    /// Remove selected slots; every name must be a configured size
    pub async fn remove_entity_slots(
        &self,
        entity: &mut OwningEntity,
        slots: &[&str],
    ) -> MediaResult<ReconcileReport> {
        let mut keys = Vec::with_capacity(slots.len());
        for slot in slots {
            if self.config.size(slot).is_none() {
                // Reuse the descriptive error, including the column prefix hint
                self.config.validate_slot(slot)?;
                return Err(MediaError::invalid_slot(
                    *slot,
                    "only configured sizes are stored on entities",
                ));
            }
            keys.push(SlotKey::from(*slot));
        }
        self.engine.reconcile(entity, &keys).await
    }

    /// Load an entity by id and remove all of its images
    pub async fn remove_images_by_id(&self, id: &EntityId) -> MediaResult<ReconcileReport> {
        let mut entity = self
            .entities
            .get(id)
            .await?
            .ok_or_else(|| MediaError::entity_not_found(id.as_str()))?;
        self.remove_entity_images(&mut entity).await
    }

    /// Delete a single variant file, optionally pruning it from its log entry
    pub async fn delete_variant(
        &self,
        log_id: &LogId,
        slot: &str,
        filename: &str,
        cleanup_log: bool,
    ) -> MediaResult<Option<PruneOutcome>> {
        let entry = self
            .logs
            .get(log_id)
            .await?
            .ok_or_else(|| MediaError::log_not_found(log_id.as_str()))?;

        if cleanup_log {
            return self.engine.prune_variant(&entry, slot, filename).await.map(Some);
        }
        self.engine.delete_file(filename).await?;
        Ok(None)
    }

    /// Delete every variant of a log entry and the entry itself
    pub async fn delete_log(&self, log_id: &LogId) -> MediaResult<Vec<StorageKey>> {
        let entry = self
            .logs
            .get(log_id)
            .await?
            .ok_or_else(|| MediaError::log_not_found(log_id.as_str()))?;
        self.engine.delete_log(&entry).await
    }

    /// Newest uploads with their variants checked against the disk
    pub async fn inventory(&self, limit: usize) -> MediaResult<Vec<LogInventory>> {
        let entries = self.logs.recent(limit).await?;
        let mut out = Vec::with_capacity(entries.len());
        for entry in &entries {
            out.push(inspect(self.disk.as_ref(), &self.resolver, entry).await?);
        }
        Ok(out)
    }

    /// Public URL of an entity's image, if the slot is populated
    pub fn image_url(&self, entity: &OwningEntity, slot: &str) -> Option<String> {
        entity
            .image(slot)
            .map(|filename| self.disk.url(&self.resolver.primary(filename).path))
    }
}

/// Wires a [`MediaLibrary`] together, defaulting to in-memory stores
pub struct MediaLibraryBuilder {
    config: MediaConfig,
    disk: Option<Arc<dyn MediaDisk>>,
    registry: Option<DiskRegistry>,
    codec: Arc<dyn ImageCodec>,
    logs: Arc<dyn UploadLogStore>,
    entities: Arc<dyn EntityStore>,
    events: Arc<dyn EventSink>,
}

impl MediaLibraryBuilder {
    pub fn new(config: MediaConfig) -> Self {
        Self {
            config,
            disk: None,
            registry: None,
            codec: Arc::new(RasterCodec::new()),
            logs: Arc::new(MemoryUploadLogStore::new()),
            entities: Arc::new(MemoryEntityStore::new()),
            events: Arc::new(NoopEvents),
        }
    }

    /// Use this disk regardless of `image_disk`
    pub fn disk<D: MediaDisk + 'static>(mut self, disk: D) -> Self {
        self.disk = Some(Arc::new(disk));
        self
    }

    /// Pick the disk named by `image_disk` from a registry
    pub fn disks(mut self, registry: DiskRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn codec<C: ImageCodec + 'static>(mut self, codec: C) -> Self {
        self.codec = Arc::new(codec);
        self
    }

    pub fn logs<L: UploadLogStore + 'static>(mut self, logs: L) -> Self {
        self.logs = Arc::new(logs);
        self
    }

    pub fn entities<E: EntityStore + 'static>(mut self, entities: E) -> Self {
        self.entities = Arc::new(entities);
        self
    }

    pub fn events<S: EventSink + 'static>(mut self, events: S) -> Self {
        self.events = Arc::new(events);
        self
    }

    pub fn build(self) -> MediaResult<MediaLibrary> {
        self.config.validate()?;

        let disk = match (self.disk, self.registry) {
            (Some(disk), _) => disk,
            (None, Some(registry)) => registry.disk(&self.config.image_disk)?,
            (None, None) => return Err(MediaError::config("no disk configured")),
        };

        let processor = VariantProcessor::new(
            self.config.clone(),
            Arc::clone(&disk),
            self.codec,
            Arc::clone(&self.logs),
            Arc::clone(&self.events),
        );
        let engine = ReconciliationEngine::new(
            self.config.clone(),
            Arc::clone(&disk),
            Arc::clone(&self.logs),
            Arc::clone(&self.entities),
            self.events,
        );

        Ok(MediaLibrary {
            resolver: KeyResolver::new(disk.name(), &self.config.upload_dir()),
            config: self.config,
            disk,
            logs: self.logs,
            entities: self.entities,
            processor,
            engine,
        })
    }
}
