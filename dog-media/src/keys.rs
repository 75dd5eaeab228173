//! Storage key resolution.
//!
//! Filenames stored on owning entities and in the upload log have been written
//! in several shapes over time: bare `name.jpg`, `blog/name.jpg`, and with
//! Windows separators. [`KeyResolver::candidates`] expands one stored value into
//! every key it may live under so deletes never miss a legacy layout.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A fully qualified location: disk name plus path within that disk
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StorageKey {
    pub disk: String,
    pub path: String,
}

impl StorageKey {
    pub fn new<D: Into<String>, P: AsRef<str>>(disk: D, path: P) -> Self {
        Self {
            disk: disk.into(),
            path: normalize_path(path.as_ref()),
        }
    }
}

impl fmt::Display for StorageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.disk, self.path)
    }
}

/// Convert backslashes, collapse repeated separators and drop the leading one
pub fn normalize_path(raw: &str) -> String {
    raw.trim()
        .replace('\\', "/")
        .split('/')
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("/")
}

/// Join a directory and a filename into a normalized key path
pub fn join_key(dir: &str, filename: &str) -> String {
    let dir = normalize_path(dir);
    let filename = normalize_path(filename);
    if dir.is_empty() {
        filename
    } else {
        format!("{dir}/{filename}")
    }
}

/// Expands stored filenames into candidate keys on one disk
#[derive(Debug, Clone)]
pub struct KeyResolver {
    disk: String,
    base_dir: String,
}

impl KeyResolver {
    pub fn new<D: Into<String>>(disk: D, base_dir: &str) -> Self {
        Self {
            disk: disk.into(),
            base_dir: normalize_path(base_dir),
        }
    }

    pub fn disk(&self) -> &str {
        &self.disk
    }

    pub fn base_dir(&self) -> &str {
        &self.base_dir
    }

    /// Key a freshly allocated filename is written under
    pub fn primary(&self, filename: &str) -> StorageKey {
        StorageKey {
            disk: self.disk.clone(),
            path: join_key(&self.base_dir, filename),
        }
    }

    /// Every key `stored` could refer to, most likely first, without duplicates.
    ///
    /// Blank input yields nothing.
    pub fn candidates(&self, stored: &str) -> Vec<StorageKey> {
        let normalized = normalize_path(stored);
        if normalized.is_empty() {
            return Vec::new();
        }

        let mut paths = Vec::with_capacity(3);
        paths.push(join_key(&self.base_dir, &normalized));
        paths.push(normalized.clone());
        // Legacy rows that already embed the directory
        if self.strip_dir(&normalized).is_some() {
            paths.push(normalized);
        }

        let mut keys: Vec<StorageKey> = Vec::with_capacity(paths.len());
        for path in paths {
            if path.is_empty() || keys.iter().any(|k| k.path == path) {
                continue;
            }
            keys.push(StorageKey {
                disk: self.disk.clone(),
                path,
            });
        }
        keys
    }

    /// Forms of a stored value that upload log entries may have recorded
    pub fn filename_aliases(&self, stored: &str) -> Vec<String> {
        let normalized = normalize_path(stored);
        if normalized.is_empty() {
            return Vec::new();
        }
        let mut aliases = vec![normalized.clone()];
        if let Some(stripped) = self.strip_dir(&normalized) {
            if !stripped.is_empty() && stripped != normalized {
                aliases.push(stripped.to_string());
            }
        }
        aliases
    }

    fn strip_dir<'a>(&self, path: &'a str) -> Option<&'a str> {
        if self.base_dir.is_empty() {
            return None;
        }
        path.strip_prefix(self.base_dir.as_str())
            .and_then(|rest| rest.strip_prefix('/'))
    }
}

/// Shorthand for `KeyResolver::new(disk, base_dir).candidates(stored)`
pub fn candidates(disk: &str, base_dir: &str, stored: &str) -> Vec<StorageKey> {
    KeyResolver::new(disk, base_dir).candidates(stored)
}
