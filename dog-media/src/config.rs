use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::keys::normalize_path;
use crate::{MediaError, MediaResult, SlotKey};

/// Prefix for environment overrides, e.g. `DOG_MEDIA__IMAGE_DISK=s3`
pub const ENV_PREFIX: &str = "DOG_MEDIA__";

/// One configured resize target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageSizeSpec {
    #[serde(alias = "w")]
    pub width: u32,
    #[serde(alias = "h")]
    pub height: u32,
    /// Crop-fit to the exact box instead of bounding with the aspect ratio kept
    #[serde(default)]
    pub crop: bool,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl ImageSizeSpec {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            crop: false,
            enabled: true,
        }
    }

    pub fn cropped(mut self) -> Self {
        self.crop = true;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    pub fn descriptor(&self) -> SizeDescriptor {
        SizeDescriptor::Dimensions {
            width: self.width,
            height: self.height,
            crop: self.crop,
        }
    }
}

/// A named size slot, kept in configuration order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SizeSlot {
    pub key: SlotKey,
    #[serde(flatten)]
    pub spec: ImageSizeSpec,
}

impl SizeSlot {
    pub fn new<K: Into<SlotKey>>(key: K, spec: ImageSizeSpec) -> Self {
        Self {
            key: key.into(),
            spec,
        }
    }

    /// Read one configured entry, either `{"key", "w", "h", "crop", "enabled"}`
    /// or `{"key", "size": [w, h]}`. Tags cannot be configured as sizes.
    pub fn from_value(value: &serde_json::Value) -> MediaResult<Self> {
        let map = value.as_object().ok_or_else(|| {
            MediaError::invalid_spec(format!("size entry must be an object: {value}"))
        })?;
        let key = map
            .get("key")
            .and_then(serde_json::Value::as_str)
            .ok_or_else(|| MediaError::invalid_spec(format!("size entry has no key: {value}")))?;
        let flag = |name: &str, default: bool| {
            map.get(name)
                .and_then(serde_json::Value::as_bool)
                .unwrap_or(default)
        };

        match SizeDescriptor::from_value(map.get("size").unwrap_or(value))? {
            SizeDescriptor::Dimensions { width, height, crop } => Ok(Self::new(
                key,
                ImageSizeSpec {
                    width,
                    height,
                    crop: crop || flag("crop", false),
                    enabled: flag("enabled", true),
                },
            )),
            other => Err(MediaError::invalid_spec(format!(
                "size '{key}' must be dimensions, got {other:?}"
            ))),
        }
    }
}

/// What a variant should look like: a concrete box, the untouched source, or a
/// free-form tag used only for naming.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SizeDescriptor {
    Dimensions { width: u32, height: u32, crop: bool },
    FullSize,
    Tag(String),
}

impl SizeDescriptor {
    /// Interpret a raw descriptor: an object/array with width and height, or a string tag
    pub fn from_value(value: &serde_json::Value) -> MediaResult<Self> {
        match value {
            serde_json::Value::String(tag) => Ok(Self::from_tag(tag)),
            serde_json::Value::Object(map) => {
                let width = map.get("w").or_else(|| map.get("width"));
                let height = map.get("h").or_else(|| map.get("height"));
                let crop = map
                    .get("crop")
                    .and_then(serde_json::Value::as_bool)
                    .unwrap_or(false);
                match (width.and_then(as_dimension), height.and_then(as_dimension)) {
                    (Some(width), Some(height)) => Ok(Self::Dimensions { width, height, crop }),
                    _ => Err(MediaError::invalid_spec(format!(
                        "size descriptor needs positive integer w and h: {value}"
                    ))),
                }
            }
            serde_json::Value::Array(items) if items.len() == 2 => {
                match (as_dimension(&items[0]), as_dimension(&items[1])) {
                    (Some(width), Some(height)) => Ok(Self::Dimensions {
                        width,
                        height,
                        crop: false,
                    }),
                    _ => Err(MediaError::invalid_spec(format!(
                        "size descriptor array must be [w, h]: {value}"
                    ))),
                }
            }
            other => Err(MediaError::invalid_spec(format!(
                "size descriptor must be dimensions or a tag, got {other}"
            ))),
        }
    }

    pub fn from_tag(tag: &str) -> Self {
        if tag == SlotKey::FULLSIZE {
            Self::FullSize
        } else {
            Self::Tag(tag.to_string())
        }
    }
}

fn as_dimension(value: &serde_json::Value) -> Option<u32> {
    value
        .as_u64()
        .filter(|v| *v > 0)
        .and_then(|v| u32::try_from(v).ok())
}

/// Configuration threaded into every media component at construction
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaConfig {
    /// Name of the disk variants are written to
    #[serde(default = "default_image_disk")]
    pub image_disk: String,

    /// Directory (key prefix) for variants on that disk
    #[serde(default = "default_upload_dir")]
    pub blog_upload_dir: String,

    /// Size slots in processing order
    #[serde(default = "default_image_sizes")]
    pub image_sizes: Vec<SizeSlot>,

    /// Encode quality 0-100
    #[serde(default = "default_quality")]
    pub image_quality: u8,

    #[serde(default = "default_enabled")]
    pub image_upload_enabled: bool,

    /// Filename candidates tried before giving up
    #[serde(default = "default_attempts")]
    pub allocation_attempts: u32,

    /// Re-check existence after entity-level deletes and warn about survivors
    #[serde(default = "default_enabled")]
    pub verify_deletes: bool,
}

fn default_image_disk() -> String {
    "public".to_string()
}

fn default_upload_dir() -> String {
    "blog".to_string()
}

fn default_quality() -> u8 {
    80
}

fn default_attempts() -> u32 {
    100
}

fn default_image_sizes() -> Vec<SizeSlot> {
    vec![
        SizeSlot::new("large", ImageSizeSpec::new(1000, 700)),
        SizeSlot::new("medium", ImageSizeSpec::new(600, 400)),
        SizeSlot::new("thumbnail", ImageSizeSpec::new(150, 150).cropped()),
    ]
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            image_disk: default_image_disk(),
            blog_upload_dir: default_upload_dir(),
            image_sizes: default_image_sizes(),
            image_quality: default_quality(),
            image_upload_enabled: true,
            allocation_attempts: default_attempts(),
            verify_deletes: true,
        }
    }
}

impl MediaConfig {
    /// Create a new config with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the disk name
    pub fn with_disk<S: Into<String>>(mut self, disk: S) -> Self {
        self.image_disk = disk.into();
        self
    }

    /// Set the upload directory
    pub fn with_upload_dir<S: Into<String>>(mut self, dir: S) -> Self {
        self.blog_upload_dir = dir.into();
        self
    }

    /// Replace all size slots
    pub fn with_sizes(mut self, sizes: Vec<SizeSlot>) -> Self {
        self.image_sizes = sizes;
        self
    }

    /// Add or replace one size slot
    pub fn with_size<K: Into<SlotKey>>(mut self, key: K, spec: ImageSizeSpec) -> Self {
        let key = key.into();
        match self.image_sizes.iter_mut().find(|slot| slot.key == key) {
            Some(slot) => slot.spec = spec,
            None => self.image_sizes.push(SizeSlot::new(key, spec)),
        }
        self
    }

    /// Set encode quality
    pub fn with_quality(mut self, quality: u8) -> Self {
        self.image_quality = quality;
        self
    }

    /// Turn uploads off
    pub fn disable_uploads(mut self) -> Self {
        self.image_upload_enabled = false;
        self
    }

    /// Set the allocator retry budget
    pub fn with_allocation_attempts(mut self, attempts: u32) -> Self {
        self.allocation_attempts = attempts;
        self
    }

    /// Skip post-delete existence checks
    pub fn skip_delete_verification(mut self) -> Self {
        self.verify_deletes = false;
        self
    }

    /// Upload directory with backslashes converted and surrounding slashes dropped
    pub fn upload_dir(&self) -> String {
        normalize_path(&self.blog_upload_dir)
    }

    pub fn size(&self, slot: &str) -> Option<&ImageSizeSpec> {
        self.image_sizes
            .iter()
            .find(|s| s.key.as_str() == slot)
            .map(|s| &s.spec)
    }

    /// Slot keys an owning entity may hold, in configuration order
    pub fn entity_slots(&self) -> Vec<SlotKey> {
        self.image_sizes.iter().map(|s| s.key.clone()).collect()
    }

    /// Check that `slot` names a configured size (or the fullsize pseudo-slot)
    pub fn validate_slot(&self, slot: &str) -> MediaResult<SizeDescriptor> {
        if slot == SlotKey::FULLSIZE {
            return Ok(SizeDescriptor::FullSize);
        }
        if let Some(spec) = self.size(slot) {
            return Ok(spec.descriptor());
        }
        if slot.starts_with("image_") {
            return Err(MediaError::invalid_slot(
                slot,
                "slot names must not begin with 'image_'; drop the column prefix",
            ));
        }
        let known: Vec<&str> = self.image_sizes.iter().map(|s| s.key.as_str()).collect();
        Err(MediaError::invalid_slot(
            slot,
            format!("expected one of {known:?} or '{}'", SlotKey::FULLSIZE),
        ))
    }

    /// Reject configurations the processor cannot honour
    pub fn validate(&self) -> MediaResult<()> {
        if self.image_disk.trim().is_empty() {
            return Err(MediaError::config("image_disk must not be empty"));
        }
        if self.image_quality > 100 {
            return Err(MediaError::invalid_spec(format!(
                "image_quality must be 0-100, got {}",
                self.image_quality
            )));
        }
        if self.allocation_attempts == 0 {
            return Err(MediaError::config("allocation_attempts must be at least 1"));
        }

        let mut seen = HashSet::new();
        for slot in &self.image_sizes {
            if slot.key.is_fullsize() {
                return Err(MediaError::invalid_spec(
                    "'fullsize' is reserved and cannot be configured as a size",
                ));
            }
            if slot.key.as_str().trim().is_empty() {
                return Err(MediaError::invalid_spec("size slot key must not be empty"));
            }
            if slot.spec.width == 0 || slot.spec.height == 0 {
                return Err(MediaError::invalid_spec(format!(
                    "size '{}' has zero dimension {}x{}",
                    slot.key, slot.spec.width, slot.spec.height
                )));
            }
            if !seen.insert(slot.key.as_str()) {
                return Err(MediaError::invalid_spec(format!(
                    "size '{}' is configured twice",
                    slot.key
                )));
            }
        }
        Ok(())
    }

    /// Load from `DOG_MEDIA__*` environment variables over the defaults
    pub fn from_env() -> MediaResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load using an arbitrary key lookup (keys carry the `DOG_MEDIA__` prefix)
    pub fn from_lookup<F>(lookup: F) -> MediaResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(&format!("{ENV_PREFIX}{name}"));
        let mut config = Self::default();

        if let Some(disk) = get("IMAGE_DISK") {
            config.image_disk = disk;
        }
        if let Some(dir) = get("BLOG_UPLOAD_DIR") {
            config.blog_upload_dir = dir;
        }
        if let Some(quality) = get("IMAGE_QUALITY") {
            config.image_quality = quality
                .trim()
                .parse()
                .map_err(|_| MediaError::config(format!("IMAGE_QUALITY is not 0-255: {quality}")))?;
        }
        if let Some(enabled) = get("IMAGE_UPLOAD_ENABLED") {
            config.image_upload_enabled = parse_flag("IMAGE_UPLOAD_ENABLED", &enabled)?;
        }
        if let Some(verify) = get("VERIFY_DELETES") {
            config.verify_deletes = parse_flag("VERIFY_DELETES", &verify)?;
        }
        if let Some(attempts) = get("ALLOCATION_ATTEMPTS") {
            config.allocation_attempts = attempts.trim().parse().map_err(|_| {
                MediaError::config(format!("ALLOCATION_ATTEMPTS is not a number: {attempts}"))
            })?;
        }
        if let Some(sizes) = get("IMAGE_SIZES") {
            config.image_sizes = parse_sizes(&sizes)?;
        }

        config.validate()?;
        Ok(config)
    }
}

/// `IMAGE_SIZES` is a JSON array so configuration order survives
fn parse_sizes(raw: &str) -> MediaResult<Vec<SizeSlot>> {
    match serde_json::from_str::<serde_json::Value>(raw)? {
        serde_json::Value::Array(entries) => entries.iter().map(SizeSlot::from_value).collect(),
        other => Err(MediaError::invalid_spec(format!(
            "IMAGE_SIZES must be an array of sizes, got {other}"
        ))),
    }
}

fn parse_flag(name: &str, value: &str) -> MediaResult<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        other => Err(MediaError::config(format!("{name} is not a boolean: {other}"))),
    }
}
