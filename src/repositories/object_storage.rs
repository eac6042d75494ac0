use anyhow::Context;
use axum::async_trait;
use chrono::{DateTime, Utc};
use nanoid::nanoid;
use std::{
    collections::HashMap,
    fmt,
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, RwLock, RwLockReadGuard, RwLockWriteGuard,
    },
    time::Duration,
};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::{
    config::ConnectionConfig,
    error::{StorageError, StorageResult},
};

/// Longest lifetime S3 accepts for a presigned request (one week).
pub const MAX_PRESIGN_EXPIRY_SECS: u64 = 7 * 24 * 60 * 60;

pub const TRACE_TARGET: &str = "storage_api::trace";

/// Fails unless `expiry_secs` is within `1..=MAX_PRESIGN_EXPIRY_SECS`.
pub fn check_presign_expiry(expiry_secs: u64) -> StorageResult<Duration> {
    if expiry_secs == 0 || expiry_secs > MAX_PRESIGN_EXPIRY_SECS {
        return Err(anyhow::anyhow!(
            "presign expiry must be between 1 and {} seconds, got {}",
            MAX_PRESIGN_EXPIRY_SECS,
            expiry_secs
        )
        .into());
    }
    Ok(Duration::from_secs(expiry_secs))
}

/// `Expires` header value as an HTTP-date, e.g. `Sun, 06 Nov 1994 08:49:37 GMT`.
pub fn http_date(value: &DateTime<Utc>) -> String {
    value.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

/// The wrapped S3 compatible client. Signing, retries and the wire format
/// live behind this seam.
#[async_trait]
pub trait ObjectStorageClient: Sized + std::marker::Send + std::marker::Sync + 'static {
    async fn connect(config: &ConnectionConfig) -> StorageResult<Self>;
    async fn bucket_exists(&self, bucket: &str) -> StorageResult<bool>;
    async fn make_bucket(&self, bucket: &str, region: Option<&str>) -> StorageResult<()>;
    async fn list_buckets(&self) -> StorageResult<Vec<BucketInfo>>;
    async fn remove_bucket(&self, bucket: &str) -> StorageResult<()>;
    async fn put_object(
        &self,
        bucket: &str,
        object: &str,
        source: ObjectSource,
        content_type: &str,
    ) -> StorageResult<()>;
    async fn remove_object(&self, bucket: &str, object: &str) -> StorageResult<()>;
    async fn stat_object(&self, bucket: &str, object: &str) -> StorageResult<ObjectStat>;
    async fn get_object(
        &self,
        bucket: &str,
        object: &str,
        sink: &mut (dyn AsyncWrite + Send + Unpin),
    ) -> StorageResult<()>;
    async fn copy_object(
        &self,
        src_bucket: &str,
        src_object: &str,
        dst_bucket: &str,
        dst_object: &str,
    ) -> StorageResult<()>;
    async fn presigned_get_object(
        &self,
        bucket: &str,
        object: &str,
        expiry_secs: u64,
        options: &PresignOptions,
    ) -> StorageResult<String>;
    fn set_trace(&self, enabled: bool);
    fn trace_enabled(&self) -> bool;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BucketInfo {
    pub name: String,
    pub creation_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectStat {
    pub name: String,
    pub size: u64,
    pub etag: Option<String>,
    pub content_type: Option<String>,
    pub last_modified: Option<DateTime<Utc>>,
    pub metadata: HashMap<String, String>,
}

pub enum ObjectSource {
    Path(PathBuf),
    Stream {
        reader: Box<dyn AsyncRead + Send + Unpin>,
        size: u64,
    },
}

impl ObjectSource {
    pub fn path(path: impl Into<PathBuf>) -> Self {
        ObjectSource::Path(path.into())
    }

    pub fn stream(reader: impl AsyncRead + Send + Unpin + 'static, size: u64) -> Self {
        ObjectSource::Stream {
            reader: Box::new(reader),
            size,
        }
    }

    /// Reads the whole source into memory.
    pub async fn into_bytes(self) -> anyhow::Result<Vec<u8>> {
        match self {
            ObjectSource::Path(path) => tokio::fs::read(&path)
                .await
                .with_context(|| format!("failed to read file [{}]", path.display())),
            ObjectSource::Stream { reader, size } => read_exact_size(reader, size).await,
        }
    }
}

impl fmt::Debug for ObjectSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ObjectSource::Path(path) => f.debug_tuple("Path").field(path).finish(),
            ObjectSource::Stream { size, .. } => {
                f.debug_struct("Stream").field("size", size).finish_non_exhaustive()
            }
        }
    }
}

const STREAM_CHUNK_CAPACITY: usize = 64 * 1024;

pub(crate) async fn read_exact_size(
    reader: Box<dyn AsyncRead + Send + Unpin>,
    size: u64,
) -> anyhow::Result<Vec<u8>> {
    // the declared size is not trusted for allocation
    let limit = usize::try_from(size)
        .with_context(|| format!("object stream size {} does not fit in memory", size))?;
    let mut data = Vec::with_capacity(limit.min(STREAM_CHUNK_CAPACITY));
    reader
        .take(size)
        .read_to_end(&mut data)
        .await
        .context("failed to read object stream")?;
    if (data.len() as u64) < size {
        anyhow::bail!("object stream ended after {} of {} bytes", data.len(), size);
    }
    Ok(data)
}

/// Response header overrides embedded in a presigned GET.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PresignOptions {
    pub response_content_type: Option<String>,
    pub response_content_disposition: Option<String>,
    pub response_cache_control: Option<String>,
    pub response_expires: Option<DateTime<Utc>>,
}

impl PresignOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn content_type(mut self, value: impl Into<String>) -> Self {
        self.response_content_type = Some(value.into());
        self
    }

    pub fn content_disposition(mut self, value: impl Into<String>) -> Self {
        self.response_content_disposition = Some(value.into());
        self
    }

    pub fn cache_control(mut self, value: impl Into<String>) -> Self {
        self.response_cache_control = Some(value.into());
        self
    }

    pub fn expires(mut self, value: DateTime<Utc>) -> Self {
        self.response_expires = Some(value);
        self
    }

    /// Query parameters in the order S3 documents them.
    pub fn query_params(&self) -> Vec<(&'static str, String)> {
        let mut params = Vec::new();
        if let Some(value) = &self.response_cache_control {
            params.push(("response-cache-control", value.clone()));
        }
        if let Some(value) = &self.response_content_disposition {
            params.push(("response-content-disposition", value.clone()));
        }
        if let Some(value) = &self.response_content_type {
            params.push(("response-content-type", value.clone()));
        }
        if let Some(value) = &self.response_expires {
            params.push(("response-expires", http_date(value)));
        }
        params
    }
}

/// Percent-encodes an object key, keeping `/` separators.
pub(crate) fn encode_key(object: &str) -> String {
    object
        .split('/')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<String>>()
        .join("/")
}

#[derive(Debug, Clone)]
struct StoredObject {
    data: Vec<u8>,
    content_type: String,
    etag: String,
    last_modified: DateTime<Utc>,
    metadata: HashMap<String, String>,
}

#[derive(Debug, Clone)]
struct BucketEntry {
    region: Option<String>,
    creation_date: DateTime<Utc>,
    objects: HashMap<String, StoredObject>,
}

type BucketDatas = HashMap<String, BucketEntry>;

/// In-process object store with S3 semantics.
#[derive(Debug, Clone)]
pub struct ObjectStorageClientForMemory {
    id: String,
    endpoint_url: String,
    store: Arc<RwLock<BucketDatas>>,
    trace: Arc<AtomicBool>,
}

impl ObjectStorageClientForMemory {
    pub fn new() -> Self {
        Self::with_endpoint_url("http://localhost:9000")
    }

    pub fn with_endpoint_url(endpoint_url: impl Into<String>) -> Self {
        Self {
            id: nanoid!(),
            endpoint_url: endpoint_url.into(),
            store: Arc::default(),
            trace: Arc::default(),
        }
    }

    /// Identifies this handle; clones share it.
    pub fn id(&self) -> &str {
        &self.id
    }

    #[cfg(test)]
    pub fn bucket_region(&self, bucket: &str) -> Option<Option<String>> {
        self.read_store_ref()
            .get(bucket)
            .map(|entry| entry.region.clone())
    }

    fn write_store_ref(&self) -> RwLockWriteGuard<BucketDatas> {
        self.store.write().unwrap()
    }

    fn read_store_ref(&self) -> RwLockReadGuard<BucketDatas> {
        self.store.read().unwrap()
    }

    fn trace_call(&self, operation: &str, bucket: &str, object: Option<&str>) {
        if self.trace_enabled() {
            tracing::info!(
                target: TRACE_TARGET,
                client = %self.id,
                operation,
                bucket,
                object = object.unwrap_or(""),
                "memory object storage call"
            );
        }
    }

    fn find_object(&self, bucket: &str, object: &str) -> StorageResult<StoredObject> {
        let store = self.read_store_ref();
        let entry = store
            .get(bucket)
            .ok_or_else(|| anyhow::anyhow!("bucket [{}] does not exist", bucket))?;
        entry
            .objects
            .get(object)
            .cloned()
            .ok_or_else(|| StorageError::not_found(bucket, object))
    }
}

impl Default for ObjectStorageClientForMemory {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ObjectStorageClient for ObjectStorageClientForMemory {
    async fn connect(config: &ConnectionConfig) -> StorageResult<Self> {
        Ok(Self::with_endpoint_url(config.endpoint_url()))
    }

    async fn bucket_exists(&self, bucket: &str) -> StorageResult<bool> {
        self.trace_call("bucket_exists", bucket, None);
        Ok(self.read_store_ref().contains_key(bucket))
    }

    async fn make_bucket(&self, bucket: &str, region: Option<&str>) -> StorageResult<()> {
        self.trace_call("make_bucket", bucket, None);
        let mut store = self.write_store_ref();
        if store.contains_key(bucket) {
            return Err(anyhow::anyhow!("bucket [{}] already exists", bucket).into());
        }
        store.insert(
            bucket.to_string(),
            BucketEntry {
                region: region.map(str::to_string),
                creation_date: Utc::now(),
                objects: HashMap::new(),
            },
        );
        Ok(())
    }

    async fn list_buckets(&self) -> StorageResult<Vec<BucketInfo>> {
        self.trace_call("list_buckets", "", None);
        let store = self.read_store_ref();
        let mut buckets = store
            .iter()
            .map(|(name, entry)| BucketInfo {
                name: name.clone(),
                creation_date: Some(entry.creation_date),
            })
            .collect::<Vec<BucketInfo>>();
        buckets.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(buckets)
    }

    async fn remove_bucket(&self, bucket: &str) -> StorageResult<()> {
        self.trace_call("remove_bucket", bucket, None);
        let mut store = self.write_store_ref();
        let entry = store
            .get(bucket)
            .ok_or_else(|| anyhow::anyhow!("bucket [{}] does not exist", bucket))?;
        if !entry.objects.is_empty() {
            return Err(anyhow::anyhow!("bucket [{}] is not empty", bucket).into());
        }
        store.remove(bucket);
        Ok(())
    }

    async fn put_object(
        &self,
        bucket: &str,
        object: &str,
        source: ObjectSource,
        content_type: &str,
    ) -> StorageResult<()> {
        self.trace_call("put_object", bucket, Some(object));
        let data = source.into_bytes().await?;

        let mut store = self.write_store_ref();
        let entry = store
            .get_mut(bucket)
            .ok_or_else(|| anyhow::anyhow!("bucket [{}] does not exist", bucket))?;
        entry.objects.insert(
            object.to_string(),
            StoredObject {
                data,
                content_type: content_type.to_string(),
                etag: format!("\"{}\"", nanoid!()),
                last_modified: Utc::now(),
                metadata: HashMap::new(),
            },
        );
        Ok(())
    }

    async fn remove_object(&self, bucket: &str, object: &str) -> StorageResult<()> {
        self.trace_call("remove_object", bucket, Some(object));
        let mut store = self.write_store_ref();
        let entry = store
            .get_mut(bucket)
            .ok_or_else(|| anyhow::anyhow!("bucket [{}] does not exist", bucket))?;
        // deleting a missing key succeeds, as on S3
        entry.objects.remove(object);
        Ok(())
    }

    async fn stat_object(&self, bucket: &str, object: &str) -> StorageResult<ObjectStat> {
        self.trace_call("stat_object", bucket, Some(object));
        // HEAD has no error body, so S3 answers a missing bucket with the same 404
        if !self.read_store_ref().contains_key(bucket) {
            return Err(StorageError::not_found(bucket, object));
        }
        let stored = self.find_object(bucket, object)?;
        Ok(ObjectStat {
            name: object.to_string(),
            size: stored.data.len() as u64,
            etag: Some(stored.etag),
            content_type: Some(stored.content_type),
            last_modified: Some(stored.last_modified),
            metadata: stored.metadata,
        })
    }

    async fn get_object(
        &self,
        bucket: &str,
        object: &str,
        sink: &mut (dyn AsyncWrite + Send + Unpin),
    ) -> StorageResult<()> {
        self.trace_call("get_object", bucket, Some(object));
        let stored = self.find_object(bucket, object)?;
        sink.write_all(&stored.data)
            .await
            .context("failed to write object into sink")?;
        sink.flush().await.context("failed to flush sink")?;
        Ok(())
    }

    async fn copy_object(
        &self,
        src_bucket: &str,
        src_object: &str,
        dst_bucket: &str,
        dst_object: &str,
    ) -> StorageResult<()> {
        self.trace_call("copy_object", src_bucket, Some(src_object));
        let mut stored = self.find_object(src_bucket, src_object)?;
        stored.etag = format!("\"{}\"", nanoid!());
        stored.last_modified = Utc::now();

        let mut store = self.write_store_ref();
        let entry = store
            .get_mut(dst_bucket)
            .ok_or_else(|| anyhow::anyhow!("bucket [{}] does not exist", dst_bucket))?;
        entry.objects.insert(dst_object.to_string(), stored);
        Ok(())
    }

    async fn presigned_get_object(
        &self,
        bucket: &str,
        object: &str,
        expiry_secs: u64,
        options: &PresignOptions,
    ) -> StorageResult<String> {
        self.trace_call("presigned_get_object", bucket, Some(object));
        check_presign_expiry(expiry_secs)?;

        let mut url = format!(
            "{}/{}/{}?X-Amz-Expires={}",
            self.endpoint_url,
            bucket,
            encode_key(object),
            expiry_secs
        );
        for (name, value) in options.query_params() {
            url.push('&');
            url.push_str(name);
            url.push('=');
            url.push_str(&urlencoding::encode(&value));
        }
        Ok(url)
    }

    fn set_trace(&self, enabled: bool) {
        self.trace.store(enabled, Ordering::Relaxed);
    }

    fn trace_enabled(&self) -> bool {
        self.trace.load(Ordering::Relaxed)
    }
}
