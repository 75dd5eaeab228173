use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region};
use aws_credential_types::Credentials;
use aws_sdk_s3::primitives::ByteStream as AwsByteStream;
use aws_sdk_s3::types::{Delete, ObjectCannedAcl, ObjectIdentifier};
use aws_sdk_s3::Client;
use bytes::Bytes;

use crate::config::ENV_PREFIX;
use crate::keys::normalize_path;
use crate::store::{MediaDisk, Visibility};
use crate::{MediaError, MediaResult};

/// S3 accepts at most this many keys per DeleteObjects request
const DELETE_BATCH: usize = 1000;

/// Connection settings for an S3-compatible disk
#[derive(Debug, Clone)]
pub struct S3DiskConfig {
    pub name: String,
    pub bucket: String,
    pub region: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    /// Custom endpoint for MinIO, RustFS and similar
    pub endpoint_url: Option<String>,
    /// Base URL objects are served from; defaults to `endpoint/bucket`
    pub public_url: Option<String>,
    /// Attach the `public-read` canned ACL to public puts
    pub public_acl: bool,
}

impl S3DiskConfig {
    /// Read `DOG_MEDIA__S3_*` variables
    pub fn from_env<S: Into<String>>(name: S) -> MediaResult<Self> {
        Self::from_lookup(name, |key| std::env::var(key).ok())
    }

    pub fn from_lookup<S, F>(name: S, lookup: F) -> MediaResult<Self>
    where
        S: Into<String>,
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(&format!("{ENV_PREFIX}S3_{key}"));
        let require = |key: &str| {
            get(key).ok_or_else(|| {
                MediaError::config(format!("{ENV_PREFIX}S3_{key} environment variable required"))
            })
        };

        Ok(Self {
            name: name.into(),
            bucket: require("BUCKET")?,
            region: get("REGION").unwrap_or_else(|| "us-east-1".to_string()),
            access_key_id: require("ACCESS_KEY_ID")?,
            secret_access_key: require("SECRET_ACCESS_KEY")?,
            endpoint_url: get("ENDPOINT_URL"),
            public_url: get("PUBLIC_URL"),
            public_acl: get("PUBLIC_ACL")
                .map(|v| matches!(v.trim(), "1" | "true" | "yes"))
                .unwrap_or(false),
        })
    }

    fn resolved_public_url(&self) -> String {
        match (&self.public_url, &self.endpoint_url) {
            (Some(url), _) => url.trim_end_matches('/').to_string(),
            (None, Some(endpoint)) => {
                format!("{}/{}", endpoint.trim_end_matches('/'), self.bucket)
            }
            (None, None) => format!(
                "https://{}.s3.{}.amazonaws.com",
                self.bucket, self.region
            ),
        }
    }
}

/// Disk stored in an S3 bucket
#[derive(Clone)]
pub struct S3Disk {
    name: String,
    client: Client,
    bucket: String,
    public_url: String,
    public_acl: bool,
}

impl S3Disk {
    /// Build a client from `config` and wrap it
    pub async fn connect(config: S3DiskConfig) -> Self {
        let credentials = Credentials::new(
            config.access_key_id.clone(),
            config.secret_access_key.clone(),
            None,
            None,
            "dog-media",
        );

        let mut loader = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(config.region.clone()))
            .credentials_provider(credentials);
        if let Some(endpoint) = &config.endpoint_url {
            loader = loader.endpoint_url(endpoint);
        }
        let aws_config = loader.load().await;

        let client = Client::from_conf(
            aws_sdk_s3::config::Builder::from(&aws_config)
                .force_path_style(config.endpoint_url.is_some())
                .build(),
        );

        Self {
            public_url: config.resolved_public_url(),
            name: config.name,
            client,
            bucket: config.bucket,
            public_acl: config.public_acl,
        }
    }

    fn backend_error<E>(&self, error: E) -> MediaError
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        MediaError::transport(&self.name, error)
    }
}

impl std::fmt::Debug for S3Disk {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3Disk")
            .field("name", &self.name)
            .field("bucket", &self.bucket)
            .field("public_url", &self.public_url)
            .finish()
    }
}

#[async_trait]
impl MediaDisk for S3Disk {
    fn name(&self) -> &str {
        &self.name
    }

    async fn exists(&self, key: &str) -> MediaResult<bool> {
        Ok(self.size(key).await?.is_some())
    }

    async fn put(&self, key: &str, bytes: Bytes, visibility: Visibility) -> MediaResult<()> {
        let key = normalize_path(key);
        let content_type = mime_guess::from_path(&key)
            .first_or_octet_stream()
            .to_string();

        let mut request = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(&key)
            .content_type(content_type)
            .body(AwsByteStream::from(bytes));
        if self.public_acl && visibility == Visibility::Public {
            request = request.acl(ObjectCannedAcl::PublicRead);
        }

        request.send().await.map_err(|e| self.backend_error(e))?;
        Ok(())
    }

    async fn delete(&self, keys: &[String]) -> MediaResult<()> {
        let keys: Vec<String> = keys
            .iter()
            .map(|k| normalize_path(k))
            .filter(|k| !k.is_empty())
            .collect();

        for chunk in keys.chunks(DELETE_BATCH) {
            let objects = chunk
                .iter()
                .map(|key| ObjectIdentifier::builder().key(key).build())
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| self.backend_error(e))?;
            let delete = Delete::builder()
                .set_objects(Some(objects))
                .quiet(true)
                .build()
                .map_err(|e| self.backend_error(e))?;

            let output = self
                .client
                .delete_objects()
                .bucket(&self.bucket)
                .delete(delete)
                .send()
                .await
                .map_err(|e| self.backend_error(e))?;

            // Quiet mode only reports failures; a missing key is not one of them
            for failure in output.errors() {
                if failure.code() == Some("NoSuchKey") {
                    continue;
                }
                return Err(MediaError::transport_msg(
                    &self.name,
                    format!(
                        "delete of {} failed: {}",
                        failure.key().unwrap_or("<unknown>"),
                        failure.message().unwrap_or("no message")
                    ),
                ));
            }
        }
        Ok(())
    }

    fn url(&self, key: &str) -> String {
        format!("{}/{}", self.public_url, normalize_path(key))
    }

    async fn size(&self, key: &str) -> MediaResult<Option<u64>> {
        let result = self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(normalize_path(key))
            .send()
            .await;

        match result {
            Ok(head) => Ok(Some(head.content_length().unwrap_or(0).max(0) as u64)),
            Err(err) => {
                let service = err.into_service_error();
                if service.is_not_found() {
                    Ok(None)
                } else {
                    Err(self.backend_error(service))
                }
            }
        }
    }
}
