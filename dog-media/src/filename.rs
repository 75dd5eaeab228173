use async_trait::async_trait;
use rand::Rng;

use crate::config::SizeDescriptor;
use crate::keys::join_key;
use crate::store::MediaDisk;
use crate::{MediaError, MediaResult};

const TITLE_CHARS: usize = 100;
const TAG_CHARS: usize = 30;
const TOKEN_LEN: usize = 5;
const TOKEN_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// Answers "is this disk path taken?" for the allocator
#[async_trait]
pub trait ExistenceCheck: Send + Sync {
    async fn exists(&self, path: &str) -> MediaResult<bool>;
}

#[async_trait]
impl<T: MediaDisk + ?Sized> ExistenceCheck for T {
    async fn exists(&self, path: &str) -> MediaResult<bool> {
        MediaDisk::exists(self, path).await
    }
}

/// Lowercase, ASCII alphanumerics only, single dashes between words
pub fn slugify(input: &str) -> String {
    input
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect::<String>()
        .split('-')
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("-")
}

/// Five random lowercase alphanumeric characters
pub fn random_token() -> String {
    let mut rng = rand::thread_rng();
    (0..TOKEN_LEN)
        .map(|_| TOKEN_ALPHABET[rng.gen_range(0..TOKEN_ALPHABET.len())] as char)
        .collect()
}

/// Suffix encoding the variant descriptor into the filename
pub fn size_suffix(descriptor: Option<&SizeDescriptor>) -> String {
    match descriptor {
        None => String::new(),
        Some(SizeDescriptor::Dimensions { width, height, .. }) => format!("-{width}x{height}"),
        Some(SizeDescriptor::FullSize) => {
            format!("-{}", slugify(crate::SlotKey::FULLSIZE))
        }
        Some(SizeDescriptor::Tag(tag)) => {
            let tag: String = tag.chars().take(TAG_CHARS).collect();
            format!("-{}", slugify(&tag))
        }
    }
}

/// Picks human-readable filenames that are free on the target disk
#[derive(Debug, Clone)]
pub struct FilenameAllocator {
    dir: String,
    max_attempts: u32,
}

impl FilenameAllocator {
    pub fn new(dir: &str, max_attempts: u32) -> Self {
        Self {
            dir: dir.to_string(),
            max_attempts,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Allocate a filename for `title` and `descriptor` ending in `.extension`.
    ///
    /// The first candidate carries no random part. Every later attempt inserts a
    /// fresh five-character token before the size suffix. Existence is checked
    /// against `dir/candidate`.
    #[tracing::instrument(level = "debug", skip(self, descriptor, check), fields(dir = %self.dir))]
    pub async fn allocate<C>(
        &self,
        title: Option<&str>,
        descriptor: Option<&SizeDescriptor>,
        extension: &str,
        check: &C,
    ) -> MediaResult<String>
    where
        C: ExistenceCheck + ?Sized,
    {
        let base = base_name(title);
        let suffix = size_suffix(descriptor);
        let extension = extension.trim_start_matches('.').to_ascii_lowercase();

        for attempt in 1..=self.max_attempts {
            let extra = if attempt == 1 {
                String::new()
            } else {
                format!("-{}", random_token())
            };
            let stem = slugify(&format!("{base}{extra}{suffix}"));
            let candidate = if extension.is_empty() {
                stem
            } else {
                format!("{stem}.{extension}")
            };

            if !check.exists(&join_key(&self.dir, &candidate)).await? {
                if attempt > 1 {
                    tracing::debug!(attempt, filename = %candidate, "allocated after collision");
                }
                return Ok(candidate);
            }
        }

        Err(MediaError::AllocationExhausted {
            base: format!("{base}{suffix}"),
            attempts: self.max_attempts,
        })
    }
}

/// First 100 characters of the title, or `image-` plus a token when nothing usable remains
fn base_name(title: Option<&str>) -> String {
    let truncated: String = title
        .map(str::trim)
        .unwrap_or_default()
        .chars()
        .take(TITLE_CHARS)
        .collect();
    if slugify(&truncated).is_empty() {
        format!("image-{}", random_token())
    } else {
        truncated
    }
}
