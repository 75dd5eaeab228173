//! Deleting variants when the storage backend cannot be trusted to confirm it.
//!
//! Storage deletes and existence checks only feed the report; the owning
//! entity's columns are cleared whatever the disk says afterwards. A transport
//! failure is the one storage outcome that stops an operation, and it does so
//! before any record is touched.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::Utc;

use crate::config::MediaConfig;
use crate::events::{EventSink, MediaEvent};
use crate::keys::{KeyResolver, StorageKey};
use crate::repository::{EntityStore, UploadLogStore};
use crate::store::MediaDisk;
use crate::{LogId, MediaResult, OwningEntity, SlotKey, UploadLogEntry};

/// Result of detaching images from an owning entity
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReconcileReport {
    /// Slots whose every candidate key is confirmed gone
    pub deleted: BTreeSet<SlotKey>,
    /// Slots with keys still reported present after the delete, mapped to every
    /// candidate key an operator has to check
    pub unconfirmed: BTreeMap<SlotKey, Vec<StorageKey>>,
    /// The candidates of each unconfirmed slot the disk still reported
    pub surviving: BTreeMap<SlotKey, Vec<StorageKey>>,
    /// Slots deleted with verification turned off
    pub unverified: BTreeSet<SlotKey>,
    /// Slots nulled on the entity
    pub cleared: BTreeSet<SlotKey>,
    /// Log entries that lost some variants
    pub pruned_logs: Vec<LogId>,
    /// Log entries removed because nothing was left in them
    pub deleted_logs: Vec<LogId>,
}

impl ReconcileReport {
    /// True when nothing needs an operator's attention
    pub fn is_clean(&self) -> bool {
        self.unconfirmed.is_empty()
    }
}

/// What happened to a log entry after one of its variants was removed
#[derive(Debug, Clone, PartialEq)]
pub enum PruneOutcome {
    /// Entry persisted with the remaining variants
    Pruned(UploadLogEntry),
    /// Entry had nothing left and was deleted
    LogDeleted(LogId),
    /// Slot was not in the entry; only the file delete was issued
    Unchanged,
}

#[derive(Clone)]
pub struct ReconciliationEngine {
    config: MediaConfig,
    disk: Arc<dyn MediaDisk>,
    logs: Arc<dyn UploadLogStore>,
    entities: Arc<dyn EntityStore>,
    events: Arc<dyn EventSink>,
    resolver: KeyResolver,
}

impl ReconciliationEngine {
    pub fn new(
        config: MediaConfig,
        disk: Arc<dyn MediaDisk>,
        logs: Arc<dyn UploadLogStore>,
        entities: Arc<dyn EntityStore>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            resolver: KeyResolver::new(disk.name(), &config.upload_dir()),
            config,
            disk,
            logs,
            entities,
            events,
        }
    }

    pub fn resolver(&self) -> &KeyResolver {
        &self.resolver
    }

    /// Delete the files behind `slots` of `entity`, null those columns and prune
    /// matching upload log variants.
    ///
    /// `entity` is only updated once the store accepted the new state.
    #[tracing::instrument(skip(self, entity, slots), fields(entity = %entity.id, disk = %self.disk.name()))]
    pub async fn reconcile(
        &self,
        entity: &mut OwningEntity,
        slots: &[SlotKey],
    ) -> MediaResult<ReconcileReport> {
        let mut report = ReconcileReport::default();

        let populated: Vec<(SlotKey, String)> = slots
            .iter()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .filter_map(|slot| {
                entity
                    .image(slot.as_str())
                    .map(|filename| (slot.clone(), filename.to_string()))
            })
            .collect();
        if populated.is_empty() {
            tracing::debug!("no populated slots");
            return Ok(report);
        }

        let per_slot: Vec<(SlotKey, Vec<StorageKey>)> = populated
            .iter()
            .map(|(slot, filename)| (slot.clone(), self.resolver.candidates(filename)))
            .collect();

        let mut batch: Vec<StorageKey> = Vec::new();
        for (_, candidates) in &per_slot {
            for key in candidates {
                if !batch.contains(key) {
                    batch.push(key.clone());
                }
            }
        }
        self.delete_keys(&batch).await?;

        for (slot, candidates) in per_slot {
            if !self.config.verify_deletes {
                report.unverified.insert(slot);
                continue;
            }
            let mut surviving = Vec::new();
            for key in &candidates {
                if self.disk.exists(&key.path).await? {
                    surviving.push(key.clone());
                }
            }
            if surviving.is_empty() {
                report.deleted.insert(slot);
            } else {
                let paths: Vec<&str> = candidates.iter().map(|k| k.path.as_str()).collect();
                let still: Vec<&str> = surviving.iter().map(|k| k.path.as_str()).collect();
                tracing::warn!(
                    slot = %slot,
                    disk = %self.disk.name(),
                    candidates = ?paths,
                    surviving = ?still,
                    "files still reported after delete; clearing the record anyway"
                );
                report.surviving.insert(slot.clone(), surviving);
                report.unconfirmed.insert(slot, candidates);
            }
        }

        let (pruned, deleted) = self.prune_logs_for(&populated).await?;
        report.pruned_logs = pruned;
        report.deleted_logs = deleted;

        let mut working = entity.clone();
        for (slot, _) in &populated {
            working.clear_image(slot.as_str());
            report.cleared.insert(slot.clone());
        }
        self.entities.save(&working).await?;
        *entity = working;

        if !report.is_clean() {
            let missing: BTreeMap<&str, Vec<&str>> = report
                .unconfirmed
                .iter()
                .map(|(slot, keys)| (slot.as_str(), keys.iter().map(|k| k.path.as_str()).collect()))
                .collect();
            let deleted: Vec<&str> = report.deleted.iter().map(SlotKey::as_str).collect();
            tracing::warn!(?missing, ?deleted, "image removal finished with unconfirmed deletes");
        } else {
            tracing::info!(
                cleared = report.cleared.len(),
                pruned_logs = report.pruned_logs.len(),
                deleted_logs = report.deleted_logs.len(),
                "image removal finished"
            );
        }
        Ok(report)
    }

    /// Delete one variant's file and drop it from its log entry
    #[tracing::instrument(skip(self, entry), fields(log_id = %entry.id))]
    pub async fn prune_variant(
        &self,
        entry: &UploadLogEntry,
        slot: &str,
        filename: &str,
    ) -> MediaResult<PruneOutcome> {
        let keys = self.resolver.candidates(filename);
        self.delete_keys(&keys).await?;

        let mut working = entry.clone();
        let removed = working.remove_variant(slot, filename);

        if working.is_empty() {
            self.logs.delete(&working.id).await?;
            tracing::debug!("log entry emptied and deleted");
            return Ok(PruneOutcome::LogDeleted(working.id));
        }
        if !removed {
            return Ok(PruneOutcome::Unchanged);
        }
        self.logs.update(&working).await?;
        Ok(PruneOutcome::Pruned(working))
    }

    /// Delete the file behind one stored filename without touching any record
    pub async fn delete_file(&self, filename: &str) -> MediaResult<Vec<StorageKey>> {
        let keys = self.resolver.candidates(filename);
        self.delete_keys(&keys).await?;
        Ok(keys)
    }

    /// Delete every variant file of `entry`, then the entry itself
    #[tracing::instrument(skip(self, entry), fields(log_id = %entry.id))]
    pub async fn delete_log(&self, entry: &UploadLogEntry) -> MediaResult<Vec<StorageKey>> {
        let mut keys: Vec<StorageKey> = Vec::new();
        for variant in entry.variants.values() {
            for key in self.resolver.candidates(&variant.filename) {
                if !keys.contains(&key) {
                    keys.push(key);
                }
            }
        }
        self.delete_keys(&keys).await?;

        if !self.logs.delete(&entry.id).await? {
            tracing::debug!("log entry was already gone");
        }
        Ok(keys)
    }

    /// One batch delete; absent keys are fine, transport errors propagate
    async fn delete_keys(&self, keys: &[StorageKey]) -> MediaResult<()> {
        if keys.is_empty() {
            return Ok(());
        }
        let paths: Vec<String> = keys.iter().map(|k| k.path.clone()).collect();
        self.disk.delete(&paths).await?;
        self.events.emit(MediaEvent::VariantsDeleted {
            keys: keys.to_vec(),
            at: Utc::now(),
        });
        Ok(())
    }

    /// Strip log variants that point at any of the entity's files
    async fn prune_logs_for(
        &self,
        populated: &[(SlotKey, String)],
    ) -> MediaResult<(Vec<LogId>, Vec<LogId>)> {
        let mut touched: BTreeMap<LogId, UploadLogEntry> = BTreeMap::new();

        for (_, filename) in populated {
            for alias in self.resolver.filename_aliases(filename) {
                for found in self.logs.find_by_filename(&alias).await? {
                    let entry = touched.entry(found.id.clone()).or_insert(found);
                    entry.variants.retain(|_, variant| variant.filename != alias);
                }
            }
        }

        let mut pruned = Vec::new();
        let mut deleted = Vec::new();
        for (id, entry) in touched {
            if entry.is_empty() {
                self.logs.delete(&id).await?;
                deleted.push(id);
            } else {
                self.logs.update(&entry).await?;
                pruned.push(id);
            }
        }
        Ok((pruned, deleted))
    }
}
