use once_cell::sync::Lazy;
use regex::Regex;
use tokio::io::AsyncWrite;

use crate::{
    config::ConnectionConfig,
    error::{StorageError, StorageResult},
    repositories::object_storage::{
        BucketInfo, ObjectSource, ObjectStat, ObjectStorageClient, PresignOptions,
    },
};

static BUCKET_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z0-9-]{2,63}[a-z0-9]$").expect("valid bucket name pattern"));

static OBJECT_NAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[0-9a-zA-Z!&$=;:+,?\-_.*'@/]{2,500}$").expect("valid object name pattern")
});

/// Lowercase letters, digits and dashes, 3 to 64 characters, not ending
/// with a dash. Periods are rejected so the name stays usable over TLS.
pub fn is_valid_bucket_name(name: &str) -> bool {
    BUCKET_NAME.is_match(name)
}

/// Characters S3 documents as safe for object keys, 2 to 500 of them.
pub fn is_valid_object_name(name: &str) -> bool {
    OBJECT_NAME.is_match(name)
}

/// Facade over an [`ObjectStorageClient`].
///
/// Built unconnected from a [`ConnectionConfig`]. [`ObjectStorage::connect`]
/// creates the client handle once, and every other operation fails with
/// [`StorageError::NotConnected`] until it has.
pub struct ObjectStorage<C: ObjectStorageClient> {
    config: ConnectionConfig,
    client: Option<C>,
}

impl<C: ObjectStorageClient> ObjectStorage<C> {
    pub fn new(config: ConnectionConfig) -> Self {
        Self {
            config,
            client: None,
        }
    }

    /// Uses an already built client; the facade starts connected.
    pub fn with_client(config: ConnectionConfig, client: C) -> Self {
        Self {
            config,
            client: Some(client),
        }
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    pub fn is_connected(&self) -> bool {
        self.client.is_some()
    }

    pub async fn connect(&mut self) -> StorageResult<()> {
        if self.client.is_some() {
            return Ok(());
        }

        let client = C::connect(&self.config).await?;
        tracing::debug!("connected to object storage at {}", self.config.endpoint());
        self.client = Some(client);
        Ok(())
    }

    fn client(&self) -> StorageResult<&C> {
        self.client.as_ref().ok_or(StorageError::NotConnected)
    }

    pub async fn bucket_exists(&self, bucket: &str) -> StorageResult<bool> {
        self.client()?.bucket_exists(bucket).await
    }

    pub async fn make_bucket(&self, bucket: &str) -> StorageResult<()> {
        let client = self.client()?;
        tracing::debug!("creating bucket [{}]", bucket);
        client.make_bucket(bucket, self.config.region()).await
    }

    pub async fn list_all(&self) -> StorageResult<Vec<BucketInfo>> {
        self.client()?.list_buckets().await
    }

    pub async fn remove_bucket(&self, bucket: &str) -> StorageResult<()> {
        let client = self.client()?;
        tracing::debug!("removing bucket [{}]", bucket);
        client.remove_bucket(bucket).await
    }

    pub async fn put_object(
        &self,
        bucket: &str,
        object: &str,
        source: ObjectSource,
        content_type: &str,
    ) -> StorageResult<()> {
        let client = self.client()?;
        tracing::debug!("uploading [{}/{}] from {:?}", bucket, object, source);
        client.put_object(bucket, object, source, content_type).await
    }

    pub async fn remove_object(&self, bucket: &str, object: &str) -> StorageResult<()> {
        self.client()?.remove_object(bucket, object).await
    }

    /// Fails with [`StorageError::NotFound`] when the object is missing.
    pub async fn stat_object(&self, bucket: &str, object: &str) -> StorageResult<ObjectStat> {
        self.client()?.stat_object(bucket, object).await
    }

    pub async fn object_exists(&self, bucket: &str, object: &str) -> StorageResult<bool> {
        match self.client()?.stat_object(bucket, object).await {
            Ok(_) => Ok(true),
            Err(err) if err.is_not_found() => {
                tracing::debug!("{}", err);
                Ok(false)
            }
            Err(err) => Err(err),
        }
    }

    pub async fn get_object<W>(&self, bucket: &str, object: &str, sink: &mut W) -> StorageResult<()>
    where
        W: AsyncWrite + Send + Unpin,
    {
        self.client()?.get_object(bucket, object, sink).await
    }

    pub async fn copy_object(
        &self,
        src_bucket: &str,
        src_object: &str,
        dst_bucket: &str,
        dst_object: &str,
    ) -> StorageResult<()> {
        self.client()?
            .copy_object(src_bucket, src_object, dst_bucket, dst_object)
            .await
    }

    pub async fn presigned_get_object(
        &self,
        bucket: &str,
        object: &str,
        expiry_secs: u64,
        options: &PresignOptions,
    ) -> StorageResult<String> {
        self.client()?
            .presigned_get_object(bucket, object, expiry_secs, options)
            .await
    }

    pub fn set_trace(&self, enabled: bool) -> StorageResult<()> {
        self.client()?.set_trace(enabled);
        Ok(())
    }
}
