mod config;
mod error;
mod handlers;
mod infras;
mod repositories;
mod services;

use axum::{extract::Extension, routing::get, Router};
use dotenv::dotenv;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use crate::config::{Backend, ConnectionConfig, SampleSettings};
use crate::handlers::download::{download_image, download_pdf};
use crate::infras::s3::S3;
use crate::repositories::object_storage::{ObjectStorageClient, ObjectStorageClientForMemory};
use crate::services::object_storage::ObjectStorage;

#[tokio::main]
async fn main() {
    dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("storage_api=debug,tower_http=debug")),
        )
        .init();

    let config = ConnectionConfig::from_env().expect("invalid object storage connection settings");
    let settings = SampleSettings::from_env().expect("invalid sample settings");

    match settings.backend {
        Backend::S3 => serve::<S3>(config, settings).await,
        Backend::Memory => serve::<ObjectStorageClientForMemory>(config, settings).await,
    }
}

async fn serve<C: ObjectStorageClient>(config: ConnectionConfig, settings: SampleSettings) {
    let mut storage = ObjectStorage::<C>::new(config);
    storage
        .connect()
        .await
        .expect(&format!("fail connect object storage, endpoint is [{}]", storage.config().endpoint()));
    storage
        .set_trace(settings.trace)
        .expect("object storage is connected");

    let addr = settings.addr;
    let app = create_app(storage, settings);

    tracing::debug!("listening on {}", addr);

    axum::Server::bind(&addr)
        .serve(app.into_make_service())
        .await
        .unwrap();
}

fn create_app<C: ObjectStorageClient>(storage: ObjectStorage<C>, settings: SampleSettings) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/download/image", get(download_image::<C>))
        .route("/download/pdf", get(download_pdf::<C>))
        .layer(Extension(Arc::new(storage)))
        .layer(Extension(Arc::new(settings)))
        .layer(TraceLayer::new_for_http())
}

async fn root() -> &'static str {
    "Object storage sample: /download/image, /download/pdf"
}

#[cfg(test)]
mod test {
    use super::*;

    use axum::body::Body;
    use http::{header, Method, Request, StatusCode};
    use tower::ServiceExt;

    use crate::repositories::object_storage::ObjectSource;

    const BUCKET: &str = "bucket-presign-test-us-west-2";

    fn build_req_with_empty(path: &str, method: Method) -> Request<Body> {
        Request::builder()
            .uri(path)
            .method(method)
            .body(Body::empty())
            .unwrap()
    }

    fn build_storage(
        client: ObjectStorageClientForMemory,
    ) -> ObjectStorage<ObjectStorageClientForMemory> {
        let config = ConnectionConfig::new(
            "localhost:9000",
            "access",
            "secret",
            false,
            Some("us-west-2".to_string()),
        );
        ObjectStorage::with_client(config, client)
    }

    fn build_settings(resource_dir: &std::path::Path) -> SampleSettings {
        SampleSettings {
            resource_dir: resource_dir.to_path_buf(),
            ..SampleSettings::default()
        }
    }

    fn location(res: &axum::response::Response) -> String {
        res.headers()
            .get(header::LOCATION)
            .expect("missing location header")
            .to_str()
            .unwrap()
            .to_string()
    }

    #[tokio::test]
    async fn should_return_banner() {
        let dir = tempfile::tempdir().unwrap();
        let req = Request::builder().uri("/").body(Body::empty()).unwrap();
        let res = create_app(
            build_storage(ObjectStorageClientForMemory::new()),
            build_settings(dir.path()),
        )
        .oneshot(req)
        .await
        .unwrap();

        let bytes = hyper::body::to_bytes(res.into_body()).await.unwrap();
        let body = String::from_utf8(bytes.to_vec()).unwrap();

        assert!(body.starts_with("Object storage sample"));
    }

    #[tokio::test]
    async fn should_upload_image_and_redirect() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("SFWar.png"), b"png bytes").unwrap();
        let client = ObjectStorageClientForMemory::new();

        let req = build_req_with_empty("/download/image", Method::GET);
        let res = create_app(build_storage(client.clone()), build_settings(dir.path()))
            .oneshot(req)
            .await
            .unwrap();

        assert_eq!(StatusCode::SEE_OTHER, res.status());
        let url = location(&res);
        assert!(url.starts_with(
            "http://localhost:9000/bucket-presign-test-us-west-2/folder/SFWar.png?X-Amz-Expires=60"
        ));
        assert!(url.contains("response-content-type=image%2Fpng"));
        assert!(url.contains("response-content-disposition=inline%3Bfilename%3DSFWar.png%3B"));
        assert!(url.contains("response-cache-control=private%2C%20max-age%3D60"));
        assert!(url.contains("response-expires="));

        assert_eq!(Some(Some("us-west-2".to_string())), client.bucket_region(BUCKET));
        let stat = client
            .stat_object(BUCKET, "folder/SFWar.png")
            .await
            .expect("image was not uploaded");
        assert_eq!(9, stat.size);
        assert_eq!(Some("image/png".to_string()), stat.content_type);
    }

    #[tokio::test]
    async fn should_skip_upload_when_object_exists() {
        // resource directory stays empty, so an upload attempt would fail
        let dir = tempfile::tempdir().unwrap();
        let client = ObjectStorageClientForMemory::new();
        client.make_bucket(BUCKET, None).await.unwrap();
        client
            .put_object(
                BUCKET,
                "folder/Azure-Analytics-SQL cheat sheet.pdf",
                ObjectSource::stream(std::io::Cursor::new(b"%PDF".to_vec()), 4),
                "application/pdf",
            )
            .await
            .unwrap();

        let req = build_req_with_empty("/download/pdf", Method::GET);
        let res = create_app(build_storage(client), build_settings(dir.path()))
            .oneshot(req)
            .await
            .unwrap();

        assert_eq!(StatusCode::SEE_OTHER, res.status());
        let url = location(&res);
        assert!(url.starts_with(
            "http://localhost:9000/bucket-presign-test-us-west-2/folder/Azure-Analytics-SQL%20cheat%20sheet.pdf?"
        ));
        assert!(url.contains("response-content-type=application%2Fpdf"));
    }

    #[tokio::test]
    async fn should_fail_when_resource_is_missing() {
        let dir = tempfile::tempdir().unwrap();
        let req = build_req_with_empty("/download/image", Method::GET);
        let res = create_app(
            build_storage(ObjectStorageClientForMemory::new()),
            build_settings(dir.path()),
        )
        .oneshot(req)
        .await
        .unwrap();

        assert_eq!(StatusCode::INTERNAL_SERVER_ERROR, res.status());
    }

    #[tokio::test]
    async fn should_fail_when_storage_is_not_connected() {
        let dir = tempfile::tempdir().unwrap();
        let config = ConnectionConfig::new("localhost:9000", "access", "secret", false, None);
        let storage = ObjectStorage::<ObjectStorageClientForMemory>::new(config);

        let req = build_req_with_empty("/download/image", Method::GET);
        let res = create_app(storage, build_settings(dir.path()))
            .oneshot(req)
            .await
            .unwrap();

        assert_eq!(StatusCode::INTERNAL_SERVER_ERROR, res.status());
        let bytes = hyper::body::to_bytes(res.into_body()).await.unwrap();
        let body = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(body.starts_with("not connected"));
    }
}
