pub mod local;
pub mod memory;
pub mod s3;

pub use local::LocalDisk;
pub use memory::MemoryDisk;
pub use s3::{S3Disk, S3DiskConfig};

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use crate::{MediaError, MediaResult};

/// Who may read a stored object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Visibility {
    #[default]
    Public,
    Private,
}

/// Storage backend for one named disk.
///
/// Keys are normalized disk-relative paths. `delete` takes a batch and must not
/// fail for keys that are already absent; only an unreachable backend is an error.
#[async_trait]
pub trait MediaDisk: Send + Sync {
    /// Disk name used in storage keys and log output
    fn name(&self) -> &str;

    /// Whether an object exists under `key`
    async fn exists(&self, key: &str) -> MediaResult<bool>;

    /// Write `bytes` under `key`, replacing any existing object
    async fn put(&self, key: &str, bytes: Bytes, visibility: Visibility) -> MediaResult<()>;

    /// Remove every key in the batch, ignoring missing ones
    async fn delete(&self, keys: &[String]) -> MediaResult<()>;

    /// Public URL for `key`
    fn url(&self, key: &str) -> String;

    /// Object size in bytes, `None` if the key does not exist
    async fn size(&self, key: &str) -> MediaResult<Option<u64>>;
}

/// Named disks available to the media components
#[derive(Clone, Default)]
pub struct DiskRegistry {
    disks: HashMap<String, Arc<dyn MediaDisk>>,
}

impl DiskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a disk under its own name
    pub fn with_disk<D: MediaDisk + 'static>(mut self, disk: D) -> Self {
        self.insert(Arc::new(disk));
        self
    }

    pub fn insert(&mut self, disk: Arc<dyn MediaDisk>) {
        self.disks.insert(disk.name().to_string(), disk);
    }

    /// Look up a disk, failing with `UnknownDisk` when it is not registered
    pub fn disk(&self, name: &str) -> MediaResult<Arc<dyn MediaDisk>> {
        self.disks
            .get(name)
            .cloned()
            .ok_or_else(|| MediaError::UnknownDisk {
                name: name.to_string(),
            })
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.disks.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl std::fmt::Debug for DiskRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiskRegistry")
            .field("disks", &self.names())
            .finish()
    }
}
