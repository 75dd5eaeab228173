use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::fs;

use crate::keys::normalize_path;
use crate::store::{MediaDisk, Visibility};
use crate::{MediaError, MediaResult};

/// Disk backed by a local directory.
///
/// Keys map to paths below `root`; writes land in `root/.tmp` first and are
/// renamed into place so readers never observe a half-written variant.
#[derive(Debug, Clone)]
pub struct LocalDisk {
    name: String,
    root: PathBuf,
    base_url: String,
}

impl LocalDisk {
    pub fn new<S: Into<String>, P: Into<PathBuf>>(name: S, root: P) -> Self {
        let name = name.into();
        Self {
            base_url: format!("/storage/{name}"),
            name,
            root: root.into(),
        }
    }

    /// URL prefix returned by [`MediaDisk::url`]
    pub fn with_base_url<S: Into<String>>(mut self, base_url: S) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn object_path(&self, key: &str) -> MediaResult<PathBuf> {
        let key = normalize_path(key);
        if key.is_empty() || key.split('/').any(|part| part == "..") {
            return Err(MediaError::transport_msg(
                &self.name,
                format!("refusing key outside disk root: {key:?}"),
            ));
        }
        Ok(self.root.join(key))
    }

    fn temp_path(&self) -> PathBuf {
        self.root.join(".tmp").join(uuid::Uuid::new_v4().to_string())
    }

    fn io_error(&self, error: std::io::Error) -> MediaError {
        MediaError::transport(&self.name, error)
    }
}

#[async_trait]
impl MediaDisk for LocalDisk {
    fn name(&self) -> &str {
        &self.name
    }

    async fn exists(&self, key: &str) -> MediaResult<bool> {
        let path = self.object_path(key)?;
        fs::try_exists(&path).await.map_err(|e| self.io_error(e))
    }

    async fn put(&self, key: &str, bytes: Bytes, _visibility: Visibility) -> MediaResult<()> {
        let path = self.object_path(key)?;
        let temp_path = self.temp_path();

        if let Some(parent) = temp_path.parent() {
            fs::create_dir_all(parent).await.map_err(|e| self.io_error(e))?;
        }
        if let Err(e) = fs::write(&temp_path, &bytes).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(self.io_error(e));
        }

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await.map_err(|e| self.io_error(e))?;
        }
        if let Err(e) = fs::rename(&temp_path, &path).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(self.io_error(e));
        }

        tracing::trace!(disk = %self.name, key, bytes = bytes.len(), "wrote object");
        Ok(())
    }

    async fn delete(&self, keys: &[String]) -> MediaResult<()> {
        for key in keys {
            let path = self.object_path(key)?;
            match fs::remove_file(&path).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(self.io_error(e)),
            }
        }
        Ok(())
    }

    fn url(&self, key: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), normalize_path(key))
    }

    async fn size(&self, key: &str) -> MediaResult<Option<u64>> {
        let path = self.object_path(key)?;
        match fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => Ok(Some(meta.len())),
            Ok(_) => Ok(None),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(self.io_error(e)),
        }
    }
}
