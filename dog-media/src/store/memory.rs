use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;

use crate::keys::normalize_path;
use crate::store::{MediaDisk, Visibility};
use crate::{MediaError, MediaResult};

/// In-memory disk for testing and development.
///
/// Carries switches that imitate misbehaving object stores: an outage, reads
/// that still see deleted objects, and puts that fail for matching keys.
#[derive(Clone)]
pub struct MemoryDisk {
    name: String,
    base_url: String,
    objects: Arc<RwLock<HashMap<String, (Bytes, Visibility)>>>,
    /// Deleted keys that stale reads keep reporting
    ghosts: Arc<RwLock<HashSet<String>>>,
    delete_calls: Arc<RwLock<Vec<Vec<String>>>>,
    fail_puts: Arc<RwLock<Option<String>>>,
    unavailable: Arc<AtomicBool>,
    stale_reads: Arc<AtomicBool>,
    exists_calls: Arc<AtomicUsize>,
}

impl MemoryDisk {
    pub fn new<S: Into<String>>(name: S) -> Self {
        let name = name.into();
        Self {
            base_url: format!("/storage/{name}"),
            name,
            objects: Arc::new(RwLock::new(HashMap::new())),
            ghosts: Arc::new(RwLock::new(HashSet::new())),
            delete_calls: Arc::new(RwLock::new(Vec::new())),
            fail_puts: Arc::new(RwLock::new(None)),
            unavailable: Arc::new(AtomicBool::new(false)),
            stale_reads: Arc::new(AtomicBool::new(false)),
            exists_calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn with_base_url<S: Into<String>>(mut self, base_url: S) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Seed an object directly, bypassing failure switches
    pub fn insert<K: AsRef<str>>(&self, key: K, bytes: impl Into<Bytes>) {
        self.objects
            .write()
            .insert(normalize_path(key.as_ref()), (bytes.into(), Visibility::Public));
    }

    /// Whether the object is really present, ignoring stale reads
    pub fn contains(&self, key: &str) -> bool {
        self.objects.read().contains_key(&normalize_path(key))
    }

    pub fn read(&self, key: &str) -> Option<Bytes> {
        self.objects
            .read()
            .get(&normalize_path(key))
            .map(|(bytes, _)| bytes.clone())
    }

    pub fn visibility(&self, key: &str) -> Option<Visibility> {
        self.objects.read().get(&normalize_path(key)).map(|(_, v)| *v)
    }

    /// All stored keys, sorted
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.objects.read().keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Make every call fail as if the backend were unreachable
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Keep reporting deleted keys as existing
    pub fn set_stale_reads(&self, stale: bool) {
        self.stale_reads.store(stale, Ordering::SeqCst);
        if !stale {
            self.ghosts.write().clear();
        }
    }

    /// Fail puts whose key contains `needle`
    pub fn fail_puts_containing<S: Into<String>>(&self, needle: S) {
        *self.fail_puts.write() = Some(needle.into());
    }

    pub fn clear_put_failures(&self) {
        *self.fail_puts.write() = None;
    }

    /// Every batch passed to `delete`, in call order
    pub fn delete_calls(&self) -> Vec<Vec<String>> {
        self.delete_calls.read().clone()
    }

    pub fn exists_calls(&self) -> usize {
        self.exists_calls.load(Ordering::SeqCst)
    }

    fn check_available(&self) -> MediaResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(MediaError::transport_msg(
                &self.name,
                "memory disk marked unavailable",
            ));
        }
        Ok(())
    }
}

impl std::fmt::Debug for MemoryDisk {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryDisk")
            .field("name", &self.name)
            .field("objects", &self.objects.read().len())
            .finish()
    }
}

#[async_trait]
impl MediaDisk for MemoryDisk {
    fn name(&self) -> &str {
        &self.name
    }

    async fn exists(&self, key: &str) -> MediaResult<bool> {
        self.check_available()?;
        self.exists_calls.fetch_add(1, Ordering::SeqCst);
        let key = normalize_path(key);
        if self.objects.read().contains_key(&key) {
            return Ok(true);
        }
        Ok(self.stale_reads.load(Ordering::SeqCst) && self.ghosts.read().contains(&key))
    }

    async fn put(&self, key: &str, bytes: Bytes, visibility: Visibility) -> MediaResult<()> {
        self.check_available()?;
        let key = normalize_path(key);
        if let Some(needle) = self.fail_puts.read().as_deref() {
            if key.contains(needle) {
                return Err(MediaError::transport_msg(
                    &self.name,
                    format!("put rejected for {key}"),
                ));
            }
        }
        self.ghosts.write().remove(&key);
        self.objects.write().insert(key, (bytes, visibility));
        Ok(())
    }

    async fn delete(&self, keys: &[String]) -> MediaResult<()> {
        self.check_available()?;
        let keys: Vec<String> = keys.iter().map(|k| normalize_path(k)).collect();
        self.delete_calls.write().push(keys.clone());

        let stale = self.stale_reads.load(Ordering::SeqCst);
        let mut objects = self.objects.write();
        let mut ghosts = self.ghosts.write();
        for key in keys {
            if objects.remove(&key).is_some() && stale {
                ghosts.insert(key);
            }
        }
        Ok(())
    }

    fn url(&self, key: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), normalize_path(key))
    }

    async fn size(&self, key: &str) -> MediaResult<Option<u64>> {
        self.check_available()?;
        Ok(self
            .objects
            .read()
            .get(&normalize_path(key))
            .map(|(bytes, _)| bytes.len() as u64))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn delete_ignores_missing_keys() {
        let disk = MemoryDisk::new("public");
        disk.insert("blog/a.jpg", &b"a"[..]);

        disk.delete(&["blog/a.jpg".into(), "never-there.jpg".into()])
            .await
            .unwrap();

        assert!(!disk.exists("blog/a.jpg").await.unwrap());
        assert_eq!(disk.delete_calls().len(), 1);
    }

    #[tokio::test]
    async fn stale_reads_report_deleted_keys() {
        let disk = MemoryDisk::new("public");
        disk.insert("blog/a.jpg", &b"a"[..]);
        disk.set_stale_reads(true);

        disk.delete(&["blog/a.jpg".into()]).await.unwrap();

        assert!(!disk.contains("blog/a.jpg"));
        assert!(disk.exists("blog/a.jpg").await.unwrap());
        assert_eq!(disk.size("blog/a.jpg").await.unwrap(), None);
    }

    #[tokio::test]
    async fn unavailable_disk_fails_with_transport_error() {
        let disk = MemoryDisk::new("public");
        disk.set_unavailable(true);

        let err = disk.exists("a.jpg").await.unwrap_err();
        assert!(err.is_transport());
        assert!(disk.delete(&["a.jpg".into()]).await.unwrap_err().is_transport());
    }

    #[tokio::test]
    async fn put_failures_match_by_substring() {
        let disk = MemoryDisk::new("public");
        disk.fail_puts_containing("600x400");

        let err = disk
            .put("blog/a-600x400.jpg", Bytes::from_static(b"x"), Visibility::Public)
            .await
            .unwrap_err();
        assert!(err.is_transport());

        disk.put("blog/a-150x150.jpg", Bytes::from_static(b"x"), Visibility::Public)
            .await
            .unwrap();
        assert_eq!(disk.size("blog/a-150x150.jpg").await.unwrap(), Some(1));
        assert_eq!(disk.url("blog/a-150x150.jpg"), "/storage/public/blog/a-150x150.jpg");
    }
}
