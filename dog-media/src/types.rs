use std::borrow::Borrow;
use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Name of a size configuration ("large", "medium", "thumbnail", "fullsize", ...)
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SlotKey(String);

impl SlotKey {
    /// Pseudo-slot that stores the source image without resizing
    pub const FULLSIZE: &'static str = "fullsize";

    pub fn new<S: Into<String>>(key: S) -> Self {
        Self(key.into())
    }

    pub fn fullsize() -> Self {
        Self(Self::FULLSIZE.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_fullsize(&self) -> bool {
        self.0 == Self::FULLSIZE
    }
}

impl std::fmt::Display for SlotKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for SlotKey {
    fn from(key: &str) -> Self {
        Self(key.to_string())
    }
}

impl From<String> for SlotKey {
    fn from(key: String) -> Self {
        Self(key)
    }
}

impl Borrow<str> for SlotKey {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// Unique identifier for an upload log entry
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LogId(pub String);

impl LogId {
    /// Generate a new random log ID
    pub fn new() -> Self {
        Self(format!("upl_{}", Uuid::new_v4().simple()))
    }

    /// Create from existing string
    pub fn from_string(id: String) -> Self {
        Self(id)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for LogId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for LogId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of the record that owns variant filenames (a post, a profile, ...)
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntityId(pub String);

impl EntityId {
    pub fn new<S: Into<String>>(id: S) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for EntityId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Where an upload event came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UploadSource {
    /// Featured image attached to an owning entity
    BlogFeaturedImage,
    /// Stand-alone upload through the image library
    ImageUpload,
}

impl UploadSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BlogFeaturedImage => "BlogFeaturedImage",
            Self::ImageUpload => "ImageUpload",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "BlogFeaturedImage" => Some(Self::BlogFeaturedImage),
            "ImageUpload" => Some(Self::ImageUpload),
            _ => None,
        }
    }
}

/// One resized/encoded file produced for one slot of one upload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadedVariant {
    pub slot_key: SlotKey,
    pub filename: String,
    pub width: u32,
    pub height: u32,
}

impl UploadedVariant {
    pub fn area(&self) -> u64 {
        u64::from(self.width) * u64::from(self.height)
    }
}

/// Audit record of one upload event and every variant it produced
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadLogEntry {
    pub id: LogId,
    pub title: Option<String>,
    pub source: UploadSource,
    pub uploader_id: Option<i64>,
    pub variants: BTreeMap<SlotKey, UploadedVariant>,
    pub created_at: DateTime<Utc>,
}

impl UploadLogEntry {
    pub fn variant(&self, slot: &str) -> Option<&UploadedVariant> {
        self.variants.get(slot)
    }

    /// Remove `slot`, plus any other slot that points at the same file.
    ///
    /// Returns true if anything was removed.
    pub fn remove_variant(&mut self, slot: &str, filename: &str) -> bool {
        let before = self.variants.len();
        self.variants
            .retain(|key, variant| key.as_str() != slot && variant.filename != filename);
        self.variants.len() != before
    }

    pub fn is_empty(&self) -> bool {
        self.variants.is_empty()
    }
}

/// Log entry as submitted by the Variant Processor, before the store assigns identity
#[derive(Debug, Clone)]
pub struct NewUploadLog {
    pub title: Option<String>,
    pub source: UploadSource,
    pub uploader_id: Option<i64>,
    pub variants: BTreeMap<SlotKey, UploadedVariant>,
}

impl NewUploadLog {
    pub fn new(source: UploadSource) -> Self {
        Self {
            title: None,
            source,
            uploader_id: None,
            variants: BTreeMap::new(),
        }
    }

    pub fn with_title<S: Into<String>>(mut self, title: S) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_uploader(mut self, uploader_id: i64) -> Self {
        self.uploader_id = Some(uploader_id);
        self
    }

    pub fn with_variant(mut self, variant: UploadedVariant) -> Self {
        self.variants.insert(variant.slot_key.clone(), variant);
        self
    }

    /// Assign identity and creation time
    pub fn into_entry(self, id: LogId, created_at: DateTime<Utc>) -> UploadLogEntry {
        UploadLogEntry {
            id,
            title: self.title,
            source: self.source,
            uploader_id: self.uploader_id,
            variants: self.variants,
            created_at,
        }
    }
}

/// The denormalized image columns of an owning record.
///
/// A slot absent from `images` is a null column. Values are copies of variant
/// filenames, not references into the upload log.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct OwningEntity {
    pub id: EntityId,
    pub images: BTreeMap<SlotKey, String>,
}

impl OwningEntity {
    pub fn new(id: EntityId) -> Self {
        Self {
            id,
            images: BTreeMap::new(),
        }
    }

    pub fn with_image<K: Into<SlotKey>, S: Into<String>>(mut self, slot: K, filename: S) -> Self {
        self.set_image(slot, filename);
        self
    }

    /// Stored filename for `slot`, ignoring empty values
    pub fn image(&self, slot: &str) -> Option<&str> {
        self.images
            .get(slot)
            .map(String::as_str)
            .filter(|name| !name.trim().is_empty())
    }

    pub fn set_image<K: Into<SlotKey>, S: Into<String>>(&mut self, slot: K, filename: S) {
        self.images.insert(slot.into(), filename.into());
    }

    pub fn clear_image(&mut self, slot: &str) -> Option<String> {
        self.images.remove(slot)
    }

    pub fn has_image(&self, slot: &str) -> bool {
        self.image(slot).is_some()
    }

    /// Slots that currently hold a non-empty filename
    pub fn populated_slots(&self) -> Vec<SlotKey> {
        self.images
            .iter()
            .filter(|(_, name)| !name.trim().is_empty())
            .map(|(slot, _)| slot.clone())
            .collect()
    }
}
