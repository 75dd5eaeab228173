use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use bytes::Bytes;
use chrono::Utc;
use image::DynamicImage;

use crate::codec::{CodecError, EncodeFormat, ImageCodec, RenderedImage};
use crate::config::{MediaConfig, SizeDescriptor};
use crate::events::{EventSink, MediaEvent};
use crate::filename::FilenameAllocator;
use crate::keys::KeyResolver;
use crate::repository::UploadLogStore;
use crate::store::{MediaDisk, Visibility};
use crate::{
    EntityId, MediaError, MediaResult, NewUploadLog, SlotKey, UploadLogEntry, UploadSource,
    UploadedVariant,
};

/// One upload event: the source bytes and which slots to derive from them
#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub bytes: Bytes,
    /// Extension of the uploaded file; decides the output format
    pub extension: String,
    pub title: Option<String>,
    pub slots: BTreeSet<SlotKey>,
    pub source: UploadSource,
    pub uploader_id: Option<i64>,
    /// Record the variants are attached to, passed through to events
    pub entity: Option<EntityId>,
}

impl UploadRequest {
    pub fn new<B: Into<Bytes>, E: Into<String>>(bytes: B, extension: E) -> Self {
        Self {
            bytes: bytes.into(),
            extension: extension.into(),
            title: None,
            slots: BTreeSet::new(),
            source: UploadSource::ImageUpload,
            uploader_id: None,
            entity: None,
        }
    }

    pub fn with_title<S: Into<String>>(mut self, title: S) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_slot<K: Into<SlotKey>>(mut self, slot: K) -> Self {
        self.slots.insert(slot.into());
        self
    }

    pub fn with_slots<I, K>(mut self, slots: I) -> Self
    where
        I: IntoIterator<Item = K>,
        K: Into<SlotKey>,
    {
        self.slots.extend(slots.into_iter().map(Into::into));
        self
    }

    pub fn with_source(mut self, source: UploadSource) -> Self {
        self.source = source;
        self
    }

    pub fn with_uploader(mut self, uploader_id: i64) -> Self {
        self.uploader_id = Some(uploader_id);
        self
    }

    pub fn for_entity(mut self, entity: EntityId) -> Self {
        self.entity = Some(entity);
        self
    }
}

/// What one batch produced
#[derive(Debug, Default)]
pub struct ProcessOutcome {
    /// Persisted log entry, present when at least one slot succeeded
    pub log: Option<UploadLogEntry>,
    pub variants: BTreeMap<SlotKey, UploadedVariant>,
    /// Slots that failed, with why
    pub errors: BTreeMap<SlotKey, MediaError>,
}

impl ProcessOutcome {
    pub fn is_complete(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn variant(&self, slot: &str) -> Option<&UploadedVariant> {
        self.variants.get(slot)
    }
}

/// Turns one upload into resized variants on the configured disk
#[derive(Clone)]
pub struct VariantProcessor {
    config: MediaConfig,
    disk: Arc<dyn MediaDisk>,
    codec: Arc<dyn ImageCodec>,
    logs: Arc<dyn UploadLogStore>,
    events: Arc<dyn EventSink>,
    allocator: FilenameAllocator,
    resolver: KeyResolver,
}

impl VariantProcessor {
    pub fn new(
        config: MediaConfig,
        disk: Arc<dyn MediaDisk>,
        codec: Arc<dyn ImageCodec>,
        logs: Arc<dyn UploadLogStore>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        let dir = config.upload_dir();
        Self {
            allocator: FilenameAllocator::new(&dir, config.allocation_attempts),
            resolver: KeyResolver::new(disk.name(), &dir),
            config,
            disk,
            codec,
            logs,
            events,
        }
    }

    pub fn config(&self) -> &MediaConfig {
        &self.config
    }

    /// Slots to render, fullsize first and then configuration order.
    ///
    /// Unknown slots come back as errors; disabled ones are dropped.
    fn plan(
        &self,
        requested: &BTreeSet<SlotKey>,
    ) -> (Vec<(SlotKey, SizeDescriptor)>, BTreeMap<SlotKey, MediaError>) {
        let mut plan = Vec::new();
        let mut errors = BTreeMap::new();

        if requested.contains(SlotKey::FULLSIZE) {
            plan.push((SlotKey::fullsize(), SizeDescriptor::FullSize));
        }
        for slot in &self.config.image_sizes {
            if !requested.contains(&slot.key) {
                continue;
            }
            if !slot.spec.enabled {
                tracing::debug!(slot = %slot.key, "size disabled, skipping");
                continue;
            }
            plan.push((slot.key.clone(), slot.spec.descriptor()));
        }
        for slot in requested {
            if let Err(err) = self.config.validate_slot(slot.as_str()) {
                errors.insert(slot.clone(), err);
            }
        }
        (plan, errors)
    }

    /// Derive, store and log every requested slot.
    ///
    /// Slots run one after another so each filename check sees the files the
    /// previous slots wrote. A slot that fails to render or write is reported in
    /// [`ProcessOutcome::errors`] and does not stop its siblings. Allocation
    /// failures and an unreachable disk abort the batch; files already written
    /// by it are removed before the error is returned.
    #[tracing::instrument(
        skip(self, request),
        fields(disk = %self.disk.name(), title = ?request.title, slots = request.slots.len())
    )]
    pub async fn process(&self, request: UploadRequest) -> MediaResult<ProcessOutcome> {
        self.config.validate()?;
        if !self.config.image_upload_enabled {
            return Err(MediaError::UploadsDisabled);
        }

        let (plan, errors) = self.plan(&request.slots);
        let mut outcome = ProcessOutcome {
            errors,
            ..Default::default()
        };
        if plan.is_empty() {
            tracing::debug!("nothing to render");
            return Ok(outcome);
        }

        let format = EncodeFormat::from_extension(&request.extension);
        let image = match self.decode(request.bytes.clone()).await {
            Ok(image) => image,
            Err(err) => {
                tracing::warn!(error = %err, "upload could not be decoded");
                for (slot, _) in plan {
                    outcome.errors.insert(slot, MediaError::Codec(err.clone()));
                }
                return Ok(outcome);
            }
        };

        let mut written: Vec<String> = Vec::new();
        for (slot, descriptor) in plan {
            let filename = match self
                .allocator
                .allocate(
                    request.title.as_deref(),
                    Some(&descriptor),
                    format.extension(),
                    self.disk.as_ref(),
                )
                .await
            {
                Ok(filename) => filename,
                Err(err) => {
                    self.discard(&written).await;
                    return Err(err);
                }
            };

            let rendered = match self.render(&image, &descriptor, format).await {
                Ok(rendered) => rendered,
                Err(err) => {
                    tracing::warn!(slot = %slot, error = %err, "variant render failed");
                    outcome.errors.insert(slot, MediaError::Codec(err));
                    continue;
                }
            };

            let key = self.resolver.primary(&filename);
            if let Err(err) = self
                .disk
                .put(&key.path, Bytes::from(rendered.bytes), Visibility::Public)
                .await
            {
                tracing::warn!(slot = %slot, key = %key, error = %err, "variant write failed");
                outcome.errors.insert(slot, err);
                continue;
            }
            written.push(key.path.clone());

            // Sized slots are recorded by their box, like the filename suffix
            let (width, height) = match descriptor {
                SizeDescriptor::Dimensions { width, height, .. } => (width, height),
                _ => (rendered.width, rendered.height),
            };
            tracing::debug!(
                slot = %slot,
                key = %key,
                width = rendered.width,
                height = rendered.height,
                "stored variant"
            );
            self.events.emit(MediaEvent::VariantUploaded {
                filename: filename.clone(),
                key,
                slot: slot.clone(),
                width,
                height,
                entity: request.entity.clone(),
                at: Utc::now(),
            });

            outcome.variants.insert(
                slot.clone(),
                UploadedVariant {
                    slot_key: slot,
                    filename,
                    width,
                    height,
                },
            );
        }

        if outcome.variants.is_empty() {
            tracing::warn!(failed = outcome.errors.len(), "no variant succeeded, nothing logged");
            return Ok(outcome);
        }

        let new_log = NewUploadLog {
            title: request.title.clone(),
            source: request.source,
            uploader_id: request.uploader_id,
            variants: outcome.variants.clone(),
        };
        match self.logs.create(new_log).await {
            Ok(entry) => {
                tracing::info!(
                    log_id = %entry.id,
                    stored = entry.variants.len(),
                    failed = outcome.errors.len(),
                    "upload processed"
                );
                outcome.log = Some(entry);
                Ok(outcome)
            }
            Err(err) => {
                self.discard(&written).await;
                Err(err)
            }
        }
    }

    async fn decode(&self, bytes: Bytes) -> Result<Arc<DynamicImage>, CodecError> {
        let codec = Arc::clone(&self.codec);
        tokio::task::spawn_blocking(move || codec.decode(&bytes).map(Arc::new))
            .await
            .map_err(|e| CodecError::Task(e.to_string()))
            .and_then(|decoded| decoded)
    }

    async fn render(
        &self,
        image: &Arc<DynamicImage>,
        descriptor: &SizeDescriptor,
        format: EncodeFormat,
    ) -> Result<RenderedImage, CodecError> {
        let codec = Arc::clone(&self.codec);
        let image = Arc::clone(image);
        let descriptor = descriptor.clone();
        let quality = self.config.image_quality;
        tokio::task::spawn_blocking(move || codec.render(&image, &descriptor, format, quality))
            .await
            .map_err(|e| CodecError::Task(e.to_string()))
            .and_then(|rendered| rendered)
    }

    /// Best-effort removal of files from an aborted batch
    async fn discard(&self, keys: &[String]) {
        if keys.is_empty() {
            return;
        }
        if let Err(err) = self.disk.delete(keys).await {
            tracing::warn!(?keys, error = %err, "could not remove files of aborted upload");
        }
    }
}
