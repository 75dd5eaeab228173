//! # dog-media: image variants that stay in sync with their records
//!
//! `dog-media` stores uploaded images as a set of resized variants on a named
//! disk, records every upload in an audit log, and removes variants again
//! without letting an unreliable object store hold record updates hostage.
//!
//! ## Key Features
//!
//! - **Readable filenames**: `hello-world-300x200.jpg`, with a random token only after a collision
//! - **Variant pipeline**: crop or bounded resize per size slot, encode at a configured quality
//! - **Partial failure isolation**: one broken slot never sinks its siblings
//! - **Legacy key resolution**: bare, directory-prefixed and backslash filenames all get deleted
//! - **Record-first deletes**: columns are cleared even when the disk still reports the file
//! - **Storage agnostic**: memory, local filesystem and S3-compatible disks
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use dog_media::prelude::*;
//!
//! # #[tokio::main]
//! # async fn main() -> MediaResult<()> {
//! let library = MediaLibrary::builder(MediaConfig::from_env()?)
//!     .disk(MemoryDisk::new("public"))
//!     .build()?;
//!
//! let mut post = OwningEntity::new(EntityId::new("post-42"));
//! let upload = UploadRequest::new(std::fs::read("photo.jpg").unwrap_or_default(), "jpg")
//!     .with_title("Hello World!");
//!
//! let outcome = library.upload_for_entity(&mut post, upload).await?;
//! for (slot, error) in &outcome.errors {
//!     eprintln!("{slot} failed: {error}");
//! }
//!
//! // Later: detach and delete every variant the post points at
//! let report = library.remove_entity_images(&mut post).await?;
//! if !report.is_clean() {
//!     eprintln!("still on disk: {:?}", report.unconfirmed);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │                MediaLibrary                  │  ← what services embed
//! ├──────────────────────┬───────────────────────┤
//! │   VariantProcessor   │  ReconciliationEngine │
//! ├──────────┬───────────┼───────────┬───────────┤
//! │ Filename │ ImageCodec│KeyResolver│ LogStore /│
//! │Allocator │           │           │EntityStore│
//! ├──────────┴───────────┴───────────┴───────────┤
//! │                  MediaDisk                   │  ← memory / local / S3
//! └──────────────────────────────────────────────┘
//! ```

pub mod codec;
pub mod config;
mod error;
pub mod events;
pub mod filename;
pub mod inventory;
pub mod keys;
pub mod library;
pub mod processor;
pub mod reconcile;
pub mod repository;
pub mod store;
#[cfg(feature = "tracing-basic")]
pub mod telemetry;
mod types;

pub use codec::{CodecError, EncodeFormat, ImageCodec, RasterCodec, RenderedImage};
pub use config::{ImageSizeSpec, MediaConfig, SizeDescriptor, SizeSlot};
pub use error::{MediaError, MediaResult};
pub use events::{BroadcastEvents, EventSink, MediaEvent, NoopEvents};
pub use filename::{ExistenceCheck, FilenameAllocator};
pub use inventory::{LogInventory, VariantFile};
pub use keys::{KeyResolver, StorageKey};
pub use library::{MediaLibrary, MediaLibraryBuilder};
pub use processor::{ProcessOutcome, UploadRequest, VariantProcessor};
pub use reconcile::{PruneOutcome, ReconcileReport, ReconciliationEngine};
pub use repository::{EntityStore, MemoryEntityStore, MemoryUploadLogStore, UploadLogStore};
#[cfg(feature = "postgres")]
pub use repository::PgUploadLogStore;
pub use store::{DiskRegistry, LocalDisk, MediaDisk, MemoryDisk, S3Disk, S3DiskConfig, Visibility};
pub use types::{
    EntityId, LogId, NewUploadLog, OwningEntity, SlotKey, UploadLogEntry, UploadSource,
    UploadedVariant,
};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::{
        EntityId, MediaConfig, MediaDisk, MediaError, MediaLibrary, MediaResult, MemoryDisk,
        OwningEntity, SlotKey, UploadRequest,
    };
}
