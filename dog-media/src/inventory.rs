use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::keys::{KeyResolver, StorageKey};
use crate::store::MediaDisk;
use crate::{LogId, MediaResult, SlotKey, UploadLogEntry};

/// Disk state of one logged variant
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VariantFile {
    pub slot: SlotKey,
    pub filename: String,
    pub key: StorageKey,
    pub exists: bool,
    /// Only set for files that exist
    pub url: Option<String>,
    pub width: u32,
    pub height: u32,
}

impl VariantFile {
    /// True when the log claims a file the disk does not have
    pub fn is_missing(&self) -> bool {
        !self.exists
    }
}

/// A log entry with each variant checked against the disk
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogInventory {
    pub id: LogId,
    pub title: Option<String>,
    pub created_at: DateTime<Utc>,
    pub files: Vec<VariantFile>,
}

impl LogInventory {
    /// Smallest existing variant by area, for list previews
    pub fn preview(&self) -> Option<&VariantFile> {
        self.files
            .iter()
            .filter(|f| f.exists && f.width > 0 && f.height > 0)
            .min_by_key(|f| u64::from(f.width) * u64::from(f.height))
    }

    pub fn missing(&self) -> impl Iterator<Item = &VariantFile> {
        self.files.iter().filter(|f| f.is_missing())
    }

    pub fn display_title(&self) -> &str {
        self.title.as_deref().unwrap_or("Untitled Photo")
    }
}

/// Check every variant of `entry` at its primary key
pub async fn inspect(
    disk: &dyn MediaDisk,
    resolver: &KeyResolver,
    entry: &UploadLogEntry,
) -> MediaResult<LogInventory> {
    let mut files = Vec::with_capacity(entry.variants.len());
    for variant in entry.variants.values() {
        if variant.filename.trim().is_empty() {
            continue;
        }
        let key = resolver.primary(&variant.filename);
        let exists = disk.exists(&key.path).await?;
        files.push(VariantFile {
            slot: variant.slot_key.clone(),
            filename: variant.filename.clone(),
            url: exists.then(|| disk.url(&key.path)),
            key,
            exists,
            width: variant.width,
            height: variant.height,
        });
    }

    Ok(LogInventory {
        id: entry.id.clone(),
        title: entry.title.clone(),
        created_at: entry.created_at,
        files,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryDisk;
    use crate::{NewUploadLog, UploadSource, UploadedVariant};

    fn variant(slot: &str, filename: &str, width: u32, height: u32) -> UploadedVariant {
        UploadedVariant {
            slot_key: SlotKey::from(slot),
            filename: filename.to_string(),
            width,
            height,
        }
    }

    #[tokio::test]
    async fn preview_is_smallest_existing_variant() {
        let disk = MemoryDisk::new("public");
        disk.insert("blog/p-1000x700.jpg", &b"l"[..]);
        disk.insert("blog/p-600x400.jpg", &b"m"[..]);
        let entry = NewUploadLog::new(UploadSource::ImageUpload)
            .with_title("P")
            .with_variant(variant("large", "p-1000x700.jpg", 1000, 700))
            .with_variant(variant("medium", "p-600x400.jpg", 600, 400))
            .with_variant(variant("thumbnail", "p-150x150.jpg", 150, 150))
            .into_entry(LogId::new(), Utc::now());

        let inventory = inspect(&disk, &KeyResolver::new("public", "blog"), &entry)
            .await
            .unwrap();

        let preview = inventory.preview().unwrap();
        assert_eq!(preview.slot.as_str(), "medium");
        assert_eq!(preview.url.as_deref(), Some("/storage/public/blog/p-600x400.jpg"));

        let missing: Vec<&str> = inventory.missing().map(|f| f.filename.as_str()).collect();
        assert_eq!(missing, vec!["p-150x150.jpg"]);
        assert_eq!(inventory.display_title(), "P");
    }
}
