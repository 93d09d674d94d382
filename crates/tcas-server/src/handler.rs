use std::io::Write;
use std::sync::Arc;

use axum::body::{Body, HttpBody};
use axum::extract::{Path, State};
use axum::http::header::{CONTENT_LENGTH, CONTENT_TYPE};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use futures::TryStreamExt;
use serde::Deserialize;
use serde_json::json;
use tcas_cas::{CasError, CasResult, TapeOffer};
use tcas_queue::QueueMessage;
use tcas_types::{ArchiveReferentialEntity, ObjectReferentialEntry};
use tokio::io::AsyncRead;
use tokio_util::io::{ReaderStream, StreamReader, SyncIoBridge};
use tracing::warn;

use crate::error::{ServerError, ServerResult};

/// Header carrying an object's hex digest, on upload and download.
pub const DIGEST_HEADER: &str = "x-digest";
pub const DIGEST_TYPE_HEADER: &str = "x-digest-type";

const STREAM_CHUNK: usize = 64 * 1024;

pub type OfferState = State<Arc<TapeOffer>>;

/// Run blocking storage work off the async executor.
async fn blocking<T, F>(f: F) -> ServerResult<T>
where
    F: FnOnce() -> CasResult<T> + Send + 'static,
    T: Send + 'static,
{
    Ok(tokio::task::spawn_blocking(f).await??)
}

pub async fn health_handler() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

pub async fn info_handler(State(offer): OfferState) -> Json<serde_json::Value> {
    let file_buckets: Vec<&str> = offer.topology().list_file_bucket_ids().collect();
    Json(json!({
        "name": "tcas-server",
        "version": env!("CARGO_PKG_VERSION"),
        "file_buckets": file_buckets,
        "digest_type": offer.config().digest_type,
    }))
}

pub async fn put_backup(
    State(offer): OfferState,
    Path(object_id): Path<String>,
    headers: HeaderMap,
    body: Body,
) -> ServerResult<(StatusCode, Json<ArchiveReferentialEntity>)> {
    let size = upload_size(&headers, &body, offer.config().server.max_upload_size)?;
    let reader = body_reader(body);
    let entity = blocking(move || offer.write_backup(&object_id, SyncIoBridge::new(reader), size)).await?;
    Ok((StatusCode::CREATED, Json(entity)))
}

pub async fn put_object(
    State(offer): OfferState,
    Path((container, name)): Path<(String, String)>,
    headers: HeaderMap,
    body: Body,
) -> ServerResult<(StatusCode, Json<ObjectReferentialEntry>)> {
    let declared = match headers.get(DIGEST_HEADER) {
        Some(value) => Some(
            value
                .to_str()
                .map_err(|_| ServerError::BadRequest(format!("{DIGEST_HEADER} is not ASCII")))?
                .to_string(),
        ),
        None => None,
    };
    let size = upload_size(&headers, &body, offer.config().server.max_upload_size)?;
    let reader = body_reader(body);
    let entry = blocking(move || {
        offer.put_object(
            &container,
            &name,
            SyncIoBridge::new(reader),
            size,
            declared.as_deref(),
        )
    })
    .await?;
    Ok((StatusCode::CREATED, Json(entry)))
}

/// Upload size from `Content-Length`, or from the body itself when it is
/// known up front.
fn upload_size(headers: &HeaderMap, body: &Body, limit: usize) -> ServerResult<u64> {
    let size = match headers.get(CONTENT_LENGTH) {
        Some(value) => value
            .to_str()
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .ok_or_else(|| ServerError::BadRequest("invalid content-length".into()))?,
        None => body.size_hint().exact().ok_or(ServerError::LengthRequired)?,
    };
    if size > limit as u64 {
        return Err(ServerError::PayloadTooLarge { size, limit });
    }
    Ok(size)
}

fn body_reader(body: Body) -> impl AsyncRead + Send + Unpin + 'static {
    StreamReader::new(body.into_data_stream().map_err(std::io::Error::other))
}

pub async fn get_object(
    State(offer): OfferState,
    Path((container, name)): Path<(String, String)>,
) -> ServerResult<Response> {
    let content = blocking(move || offer.get_object(&container, &name)).await?;
    let entry = content.entry;
    let mut source = content.reader;

    let (pipe, sink) = tokio::io::duplex(STREAM_CHUNK);
    let expected = entry.size;
    let id = entry.id.to_string();
    tokio::task::spawn_blocking(move || {
        let mut sink = SyncIoBridge::new(sink);
        match std::io::copy(&mut source, &mut sink).and_then(|n| sink.flush().map(|()| n)) {
            Ok(n) if n == expected => {}
            Ok(n) => warn!(%id, sent = n, expected, "object shorter than recorded"),
            Err(e) => warn!(%id, error = %e, "object stream interrupted"),
        }
    });

    Ok((
        [
            (CONTENT_TYPE, "application/octet-stream".to_string()),
            (CONTENT_LENGTH, entry.size.to_string()),
        ],
        [
            (DIGEST_HEADER, entry.digest),
            (DIGEST_TYPE_HEADER, entry.digest_type.to_string()),
        ],
        Body::from_stream(ReaderStream::new(pipe)),
    )
        .into_response())
}

pub async fn list_queue(State(offer): OfferState) -> ServerResult<Json<Vec<QueueMessage>>> {
    Ok(Json(blocking(move || offer.list_write_orders()).await?))
}

/// Lease the oldest write order; `204` when the queue is drained.
pub async fn poll_queue(State(offer): OfferState) -> ServerResult<Response> {
    Ok(match blocking(move || offer.poll_write_order()).await? {
        Some(message) => Json(message).into_response(),
        None => StatusCode::NO_CONTENT.into_response(),
    })
}

pub async fn release_order(
    State(offer): OfferState,
    Path(archive_id): Path<String>,
) -> ServerResult<StatusCode> {
    blocking(move || offer.release_write_order(&archive_id)).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Completion report from the tape driver.
#[derive(Debug, Deserialize)]
pub struct CompleteRequest {
    pub tape_code: String,
    pub tape_position: u32,
    /// Digest computed by reading the archive back from tape.
    pub digest: String,
}

pub async fn complete_order(
    State(offer): OfferState,
    Path(archive_id): Path<String>,
    Json(request): Json<CompleteRequest>,
) -> ServerResult<Json<ArchiveReferentialEntity>> {
    let entity = blocking(move || {
        offer.complete_write_order(
            &archive_id,
            &request.tape_code,
            request.tape_position,
            &request.digest,
        )
    })
    .await?;
    Ok(Json(entity))
}

pub async fn get_archive(
    State(offer): OfferState,
    Path(archive_id): Path<String>,
) -> ServerResult<Json<ArchiveReferentialEntity>> {
    let entity = blocking(move || {
        offer
            .find_archive(&archive_id)?
            .ok_or_else(|| CasError::NotFound(format!("archive {archive_id}")))
    })
    .await?;
    Ok(Json(entity))
}

pub async fn flush(State(offer): OfferState) -> ServerResult<StatusCode> {
    offer.flush_all()?;
    Ok(StatusCode::ACCEPTED)
}
