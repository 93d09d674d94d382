//! Admin HTTP surface of the tape offer.
//!
//! Object and backup uploads, object reads while still on disk, and the write
//! order queue consumed by the external tape driver.

pub mod error;
pub mod handler;
pub mod router;
pub mod server;

pub use error::{ServerError, ServerResult};
pub use handler::CompleteRequest;
pub use router::build_router;
pub use server::TcasServer;

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use axum::Router;
    use serde_json::Value;
    use std::sync::Arc;
    use tcas_cas::{OfferConfig, TapeOffer};
    use tempfile::TempDir;
    use tower::util::ServiceExt;

    async fn app() -> (TempDir, Arc<TapeOffer>, Router) {
        let dir = tempfile::tempdir().unwrap();
        let mut config = OfferConfig::with_root(dir.path());
        config.sync_journal = false;
        let offer = Arc::new(TapeOffer::open(config).await.unwrap());
        let router = TcasServer::new(offer.clone()).router();
        (dir, offer, router)
    }

    async fn send(app: &Router, method: &str, uri: &str, body: Body) -> (StatusCode, bytes::Bytes) {
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method(method)
                    .uri(uri)
                    .header("content-type", "application/json")
                    .body(body)
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = response.status();
        (status, to_bytes(response.into_body(), usize::MAX).await.unwrap())
    }

    fn json(bytes: &[u8]) -> Value {
        serde_json::from_slice(bytes).unwrap()
    }

    #[tokio::test]
    async fn health_endpoint() {
        let (_dir, _offer, app) = app().await;
        let (status, _) = send(&app, "GET", "/v1/health", Body::empty()).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn info_lists_file_buckets() {
        let (_dir, _offer, app) = app().await;
        let (status, body) = send(&app, "GET", "/v1/info", Body::empty()).await;
        assert_eq!(status, StatusCode::OK);
        let buckets = json(&body)["file_buckets"].clone();
        assert_eq!(buckets, serde_json::json!(["default-metadata", "default-objects"]));
    }

    #[tokio::test]
    async fn object_upload_and_read() {
        let (_dir, _offer, app) = app().await;
        let (status, body) = send(&app, "PUT", "/v1/objects/0_unit/u1", Body::from("hello")).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(json(&body)["size"], 5);

        let (status, body) = send(&app, "GET", "/v1/objects/0_unit/u1", Body::empty()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(&body[..], b"hello");

        let (status, _) = send(&app, "GET", "/v1/objects/0_unit/missing", Body::empty()).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, _) = send(&app, "PUT", "/v1/objects/9_nothing/x", Body::from("x")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn wrong_declared_digest_is_rejected() {
        let (_dir, _offer, app) = app().await;
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("PUT")
                    .uri("/v1/objects/0_unit/u1")
                    .header(handler::DIGEST_HEADER, "00")
                    .body(Body::from("hello"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn backup_lifecycle_through_the_queue() {
        let (_dir, _offer, app) = app().await;
        let (status, body) = send(&app, "PUT", "/v1/tape/backup/db.zip", Body::from("dump")).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(json(&body)["location"], "ReadyOnDisk");

        let (status, _) = send(&app, "PUT", "/v1/tape/backup/db.zip", Body::from("dump")).await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (_, body) = send(&app, "GET", "/v1/tape/queue", Body::empty()).await;
        assert_eq!(json(&body).as_array().unwrap().len(), 1);

        let (status, body) = send(&app, "POST", "/v1/tape/queue/poll", Body::empty()).await;
        assert_eq!(status, StatusCode::OK);
        let order = json(&body);
        assert_eq!(order["id"], "db.zip");
        let digest = order["order"]["digest"].as_str().unwrap().to_string();

        let (status, _) = send(&app, "POST", "/v1/tape/queue/poll", Body::empty()).await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let bad = serde_json::json!({ "tape_code": "T1", "tape_position": 2, "digest": "00" });
        let (status, _) = send(&app, "POST", "/v1/tape/queue/db.zip/complete", Body::from(bad.to_string())).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

        let good = serde_json::json!({ "tape_code": "T1", "tape_position": 2, "digest": digest });
        let (status, body) = send(&app, "POST", "/v1/tape/queue/db.zip/complete", Body::from(good.to_string())).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json(&body)["location"]["OnTape"]["tape_code"], "T1");

        let (_, body) = send(&app, "GET", "/v1/tape/queue", Body::empty()).await;
        assert!(json(&body).as_array().unwrap().is_empty());
        let (status, _) = send(&app, "GET", "/v1/tape/archives/db.zip", Body::empty()).await;
        assert_eq!(status, StatusCode::OK);
        let (status, _) = send(&app, "GET", "/v1/tape/archives/other", Body::empty()).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    fn chunked(data: &[u8]) -> Body {
        let chunks: Vec<Vec<u8>> = data.chunks(8 * 1024).map(<[u8]>::to_vec).collect();
        Body::from_stream(futures::stream::iter(chunks.into_iter().map(Ok::<_, std::io::Error>)))
    }

    async fn put_with_length(app: &Router, uri: &str, length: Option<u64>, body: Body) -> StatusCode {
        let mut request = Request::builder().method("PUT").uri(uri);
        if let Some(length) = length {
            request = request.header("content-length", length.to_string());
        }
        app.clone().oneshot(request.body(body).unwrap()).await.unwrap().status()
    }

    #[tokio::test]
    async fn uploads_and_reads_are_streamed() {
        let (_dir, _offer, app) = app().await;
        let data: Vec<u8> = (0..300 * 1024u32).map(|i| (i % 251) as u8).collect();

        let status = put_with_length(&app, "/v1/objects/0_unit/big", Some(data.len() as u64), chunked(&data)).await;
        assert_eq!(status, StatusCode::CREATED);

        let response = app
            .clone()
            .oneshot(Request::builder().uri("/v1/objects/0_unit/big").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["content-length"], data.len().to_string().as_str());
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], &data[..]);

        let status = put_with_length(&app, "/v1/tape/backup/big.zip", Some(data.len() as u64), chunked(&data)).await;
        assert_eq!(status, StatusCode::CREATED);
    }

    #[tokio::test]
    async fn upload_size_is_enforced() {
        let (_dir, offer, app) = app().await;
        // No content-length and no known body size.
        let status = put_with_length(&app, "/v1/objects/0_unit/a", None, chunked(b"abc")).await;
        assert_eq!(status, StatusCode::LENGTH_REQUIRED);

        let limit = offer.config().server.max_upload_size as u64;
        let status = put_with_length(&app, "/v1/tape/backup/huge.zip", Some(limit + 1), Body::from("x")).await;
        assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
        assert!(offer.find_archive("huge.zip").unwrap().is_none());

        // Body ends before the declared size.
        let status = put_with_length(&app, "/v1/tape/backup/short.zip", Some(10), chunked(b"abcd")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(offer.find_archive("short.zip").unwrap().is_none());
    }

    #[tokio::test]
    async fn release_unknown_lease() {
        let (_dir, _offer, app) = app().await;
        let (status, _) = send(&app, "POST", "/v1/tape/queue/nope/release", Body::empty()).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
