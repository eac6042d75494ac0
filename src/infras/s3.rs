use anyhow::Context;
use aws_sdk_s3::{
    config::{Credentials, Region},
    error::SdkError,
    presigning::PresigningConfig,
    primitives::{ByteStream, DateTime as SdkDateTime},
    types::{BucketLocationConstraint, CreateBucketConfiguration},
    Client,
};
use axum::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::{
    config::ConnectionConfig,
    error::{StorageError, StorageResult},
    repositories::object_storage::{
        check_presign_expiry, encode_key, read_exact_size, BucketInfo, ObjectSource, ObjectStat,
        ObjectStorageClient, PresignOptions, TRACE_TARGET,
    },
};

// Region used for signing when none is configured.
const DEFAULT_SIGNING_REGION: &str = "us-east-1";

pub struct S3 {
    client: Client,
    trace: AtomicBool,
}

impl S3 {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            trace: AtomicBool::new(false),
        }
    }

    fn trace_call(&self, operation: &str, bucket: &str, object: Option<&str>) {
        if self.trace_enabled() {
            tracing::info!(
                target: TRACE_TARGET,
                operation,
                bucket,
                object = object.unwrap_or(""),
                "s3 call"
            );
        }
    }

    fn trace_result<T, E: std::fmt::Display>(&self, operation: &str, result: &Result<T, E>) {
        if self.trace_enabled() {
            match result {
                Ok(_) => tracing::info!(target: TRACE_TARGET, operation, "s3 call succeeded"),
                Err(err) => tracing::info!(target: TRACE_TARGET, operation, error = %err, "s3 call failed"),
            }
        }
    }
}

/// Location constraint sent with CreateBucket; absent without a region.
fn bucket_configuration(region: Option<&str>) -> Option<CreateBucketConfiguration> {
    region.map(|region| {
        CreateBucketConfiguration::builder()
            .location_constraint(BucketLocationConstraint::from(region))
            .build()
    })
}

fn to_chrono(value: &SdkDateTime) -> Option<DateTime<Utc>> {
    Utc.timestamp_opt(value.secs(), value.subsec_nanos()).single()
}

#[async_trait]
impl ObjectStorageClient for S3 {
    async fn connect(config: &ConnectionConfig) -> StorageResult<Self> {
        // The region is only used for signing here. Bucket creation passes it
        // explicitly as a location constraint.
        let region = config.region().unwrap_or(DEFAULT_SIGNING_REGION).to_string();
        let credentials = Credentials::new(
            config.access_key(),
            config.secret_key(),
            None,
            None,
            "storage-api",
        );
        let shared_config = aws_config::from_env()
            .region(Region::new(region))
            .credentials_provider(credentials)
            .load()
            .await;
        let s3_config = aws_sdk_s3::config::Builder::from(&shared_config)
            .endpoint_url(config.endpoint_url())
            .force_path_style(true)
            .build();

        tracing::debug!("connected s3 client to {}", config.endpoint_url());
        Ok(S3::new(Client::from_conf(s3_config)))
    }

    async fn bucket_exists(&self, bucket: &str) -> StorageResult<bool> {
        self.trace_call("bucket_exists", bucket, None);
        let result = self.client.head_bucket().bucket(bucket).send().await;
        self.trace_result("bucket_exists", &result);
        match result {
            Ok(_) => Ok(true),
            Err(SdkError::ServiceError(err)) if err.err().is_not_found() => Ok(false),
            Err(err) => Err(anyhow::Error::from(err)
                .context(format!("failed to check bucket [{}]", bucket))
                .into()),
        }
    }

    async fn make_bucket(&self, bucket: &str, region: Option<&str>) -> StorageResult<()> {
        self.trace_call("make_bucket", bucket, None);
        let result = self
            .client
            .create_bucket()
            .bucket(bucket)
            .set_create_bucket_configuration(bucket_configuration(region))
            .send()
            .await;
        self.trace_result("make_bucket", &result);
        result.with_context(|| format!("failed to create bucket [{}]", bucket))?;
        Ok(())
    }

    async fn list_buckets(&self) -> StorageResult<Vec<BucketInfo>> {
        self.trace_call("list_buckets", "", None);
        let result = self.client.list_buckets().send().await;
        self.trace_result("list_buckets", &result);
        let output = result.context("failed to list buckets")?;

        let buckets = output
            .buckets()
            .unwrap_or_default()
            .iter()
            .map(|bucket| BucketInfo {
                name: bucket.name().unwrap_or_default().to_string(),
                creation_date: bucket.creation_date().and_then(to_chrono),
            })
            .collect::<Vec<BucketInfo>>();
        Ok(buckets)
    }

    async fn remove_bucket(&self, bucket: &str) -> StorageResult<()> {
        self.trace_call("remove_bucket", bucket, None);
        let result = self.client.delete_bucket().bucket(bucket).send().await;
        self.trace_result("remove_bucket", &result);
        result.with_context(|| format!("failed to remove bucket [{}]", bucket))?;
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
        let (body, size) = match source {
            ObjectSource::Path(path) => {
                let body = ByteStream::from_path(&path)
                    .await
                    .with_context(|| format!("failed to open file [{}]", path.display()))?;
                (body, None)
            }
            ObjectSource::Stream { reader, size } => {
                let data = read_exact_size(reader, size).await?;
                (ByteStream::from(data), Some(size as i64))
            }
        };

        let result = self
            .client
            .put_object()
            .bucket(bucket)
            .key(object)
            .body(body)
            .set_content_length(size)
            .content_type(content_type)
            .send()
            .await;
        self.trace_result("put_object", &result);
        result.with_context(|| format!("failed to put object [{}/{}]", bucket, object))?;
        Ok(())
    }

    async fn remove_object(&self, bucket: &str, object: &str) -> StorageResult<()> {
        self.trace_call("remove_object", bucket, Some(object));
        let result = self
            .client
            .delete_object()
            .bucket(bucket)
            .key(object)
            .send()
            .await;
        self.trace_result("remove_object", &result);
        result.with_context(|| format!("failed to remove object [{}/{}]", bucket, object))?;
        Ok(())
    }

    async fn stat_object(&self, bucket: &str, object: &str) -> StorageResult<ObjectStat> {
        self.trace_call("stat_object", bucket, Some(object));
        let result = self
            .client
            .head_object()
            .bucket(bucket)
            .key(object)
            .send()
            .await;
        self.trace_result("stat_object", &result);
        match result {
            Ok(output) => Ok(ObjectStat {
                name: object.to_string(),
                size: output.content_length().max(0) as u64,
                etag: output.e_tag().map(str::to_string),
                content_type: output.content_type().map(str::to_string),
                last_modified: output.last_modified().and_then(to_chrono),
                metadata: output.metadata().cloned().unwrap_or_default(),
            }),
            Err(SdkError::ServiceError(err)) if err.err().is_not_found() => {
                Err(StorageError::not_found(bucket, object))
            }
            Err(err) => Err(anyhow::Error::from(err)
                .context(format!("failed to stat object [{}/{}]", bucket, object))
                .into()),
        }
    }

    async fn get_object(
        &self,
        bucket: &str,
        object: &str,
        sink: &mut (dyn AsyncWrite + Send + Unpin),
    ) -> StorageResult<()> {
        self.trace_call("get_object", bucket, Some(object));
        let result = self
            .client
            .get_object()
            .bucket(bucket)
            .key(object)
            .send()
            .await;
        self.trace_result("get_object", &result);
        let output = match result {
            Ok(output) => output,
            Err(SdkError::ServiceError(err)) if err.err().is_no_such_key() => {
                return Err(StorageError::not_found(bucket, object));
            }
            Err(err) => {
                return Err(anyhow::Error::from(err)
                    .context(format!("failed to get object [{}/{}]", bucket, object))
                    .into());
            }
        };

        let mut body = output.body.into_async_read();
        tokio::io::copy(&mut body, &mut *sink)
            .await
            .with_context(|| format!("failed to stream object [{}/{}]", bucket, object))?;
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
        let result = self
            .client
            .copy_object()
            .copy_source(format!("{}/{}", src_bucket, encode_key(src_object)))
            .bucket(dst_bucket)
            .key(dst_object)
            .send()
            .await;
        self.trace_result("copy_object", &result);
        result.with_context(|| {
            format!(
                "failed to copy object [{}/{}] to [{}/{}]",
                src_bucket, src_object, dst_bucket, dst_object
            )
        })?;
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
        let expires_in = check_presign_expiry(expiry_secs)?;
        let presigning = PresigningConfig::expires_in(expires_in)
            .with_context(|| format!("invalid presign expiry of {} seconds", expiry_secs))?;

        let result = self
            .client
            .get_object()
            .bucket(bucket)
            .key(object)
            .set_response_content_type(options.response_content_type.clone())
            .set_response_content_disposition(options.response_content_disposition.clone())
            .set_response_cache_control(options.response_cache_control.clone())
            .set_response_expires(
                options
                    .response_expires
                    .map(|expires| SdkDateTime::from_secs(expires.timestamp())),
            )
            .presigned(presigning)
            .await;
        self.trace_result("presigned_get_object", &result);
        let presigned = result
            .with_context(|| format!("failed to presign object [{}/{}]", bucket, object))?;
        Ok(presigned.uri().to_string())
    }

    fn set_trace(&self, enabled: bool) {
        self.trace.store(enabled, Ordering::Relaxed);
    }

    fn trace_enabled(&self) -> bool {
        self.trace.load(Ordering::Relaxed)
    }
}
