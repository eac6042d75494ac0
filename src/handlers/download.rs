use std::sync::Arc;

use axum::{
    extract::Extension,
    http::StatusCode,
    response::{IntoResponse, Redirect, Response},
};
use chrono::{Duration, Utc};
use mime::Mime;

use crate::{
    config::SampleSettings,
    error::StorageError,
    repositories::object_storage::{
        ObjectSource, ObjectStorageClient, PresignOptions, MAX_PRESIGN_EXPIRY_SECS,
    },
    services::object_storage::ObjectStorage,
};

/// A file shipped in the resource directory and mirrored into the bucket.
pub struct SampleObject {
    pub key: &'static str,
    pub file_name: &'static str,
    pub content_type: Mime,
}

pub const IMAGE: SampleObject = SampleObject {
    key: "folder/SFWar.png",
    file_name: "SFWar.png",
    content_type: mime::IMAGE_PNG,
};

pub const PDF: SampleObject = SampleObject {
    key: "folder/Azure-Analytics-SQL cheat sheet.pdf",
    file_name: "Azure-Analytics-SQL cheat sheet.pdf",
    content_type: mime::APPLICATION_PDF,
};

pub async fn download_image<C: ObjectStorageClient>(
    Extension(storage): Extension<Arc<ObjectStorage<C>>>,
    Extension(settings): Extension<Arc<SampleSettings>>,
) -> Result<Redirect, DownloadError> {
    redirect_to_presigned(&storage, &settings, &IMAGE).await
}

pub async fn download_pdf<C: ObjectStorageClient>(
    Extension(storage): Extension<Arc<ObjectStorage<C>>>,
    Extension(settings): Extension<Arc<SampleSettings>>,
) -> Result<Redirect, DownloadError> {
    redirect_to_presigned(&storage, &settings, &PDF).await
}

async fn redirect_to_presigned<C: ObjectStorageClient>(
    storage: &ObjectStorage<C>,
    settings: &SampleSettings,
    sample: &SampleObject,
) -> Result<Redirect, DownloadError> {
    let bucket = settings.bucket.as_str();

    if !storage.bucket_exists(bucket).await? {
        storage.make_bucket(bucket).await?;
    }

    if !storage.object_exists(bucket, sample.key).await? {
        let path = settings.resource_dir.join(sample.file_name);
        if tokio::fs::metadata(&path).await.is_err() {
            return Err(DownloadError::MissingResource(path.display().to_string()));
        }
        tracing::info!("uploading sample [{}] to bucket [{}]", sample.key, bucket);
        storage
            .put_object(
                bucket,
                sample.key,
                ObjectSource::path(path),
                sample.content_type.as_ref(),
            )
            .await?;
    }

    let expiry = settings.presign_expiry_secs;
    let options = PresignOptions::new()
        .content_disposition(format!("inline;filename={};", sample.file_name))
        .content_type(sample.content_type.as_ref())
        .cache_control(format!("private, max-age={}", expiry))
        .expires(Utc::now() + Duration::seconds(expiry.min(MAX_PRESIGN_EXPIRY_SECS) as i64));
    let url = storage
        .presigned_get_object(bucket, sample.key, expiry, &options)
        .await?;

    Ok(Redirect::to(&url))
}

#[derive(Debug)]
pub enum DownloadError {
    MissingResource(String),
    Storage(StorageError),
}

impl From<StorageError> for DownloadError {
    fn from(err: StorageError) -> Self {
        DownloadError::Storage(err)
    }
}

impl IntoResponse for DownloadError {
    fn into_response(self) -> Response {
        match self {
            DownloadError::MissingResource(path) => {
                tracing::warn!("sample resource [{}] not found", path);
                (StatusCode::INTERNAL_SERVER_ERROR, format!("Not found resource {}", path)).into_response()
            }
            DownloadError::Storage(err) => {
                tracing::warn!("object storage call failed: {:#}", err);
                (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response()
            }
        }
    }
}
