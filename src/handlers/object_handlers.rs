//! HTTP handlers for object operations.
//! Uploads and raw reads stream through the service without buffering whole
//! bodies in memory; everything else is JSON.

use crate::{
    errors::AppError,
    models::object::{ObjectUpdate, RawObjectMetadata, StorageObject, StorageObjectAccess},
    state::AppState,
};
use axum::{
    Json,
    body::{Body, Bytes},
    extract::{
        Multipart, Path, Query, State,
        multipart::{Field, MultipartError},
    },
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use futures::{Stream, StreamExt};
use serde::Deserialize;
use std::io;
use tokio_util::io::ReaderStream;
use tracing::warn;
use uuid::Uuid;

/// Header carrying the passphrase for encrypted objects.
pub const ENCRYPTION_KEY_HEADER: &str = "x-encryption-key";

/// Multipart field holding the uploaded bytes.
const CONTENT_FIELD: &str = "content";

const RESPONSE_PIPE_LEN: usize = 64 * 1024;

#[derive(Debug, Deserialize)]
pub struct GroupQuery {
    /// Group id or name.
    pub group: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RawQuery {
    /// `inline` or `attachment` (default).
    pub disposition: Option<String>,
}

/// GET `/api/objects?group=`
pub async fn list_objects(
    State(state): State<AppState>,
    Query(q): Query<GroupQuery>,
) -> Result<Json<Vec<StorageObject>>, AppError> {
    let objects = state.objects.list_objects(q.group.as_deref()).await?;
    Ok(Json(objects))
}

/// POST `/api/objects?group=` with a multipart `content` field.
pub async fn create_object(
    State(state): State<AppState>,
    Query(q): Query<GroupQuery>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<Response, AppError> {
    let group = q
        .group
        .ok_or_else(|| AppError::bad_request("query parameter `group` is required"))?;
    let passphrase = passphrase(&headers);

    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        if field.name() != Some(CONTENT_FIELD) {
            continue;
        }
        let filename = field.file_name().map(str::to_owned);
        let object = state
            .objects
            .create_object(
                &group,
                filename.as_deref(),
                field_stream(field),
                None,
                passphrase,
            )
            .await?;

        let mut response = (StatusCode::CREATED, Json(&object)).into_response();
        if let Ok(location) = HeaderValue::from_str(&format!("/api/objects/{}", object.id)) {
            response.headers_mut().insert(header::LOCATION, location);
        }
        return Ok(response);
    }

    Err(missing_content())
}

/// GET `/api/objects/{id}`
pub async fn get_object(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<StorageObject>, AppError> {
    Ok(Json(state.objects.get_object(id).await?))
}

/// GET `/api/objects/{id}/accesses`
pub async fn list_accesses(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<StorageObjectAccess>>, AppError> {
    Ok(Json(state.objects.list_accesses(id).await?))
}

/// PUT `/api/objects/{id}`: name, group and metadata.
pub async fn update_object(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(update): Json<ObjectUpdate>,
) -> Result<Json<StorageObject>, AppError> {
    Ok(Json(state.objects.update_object(id, update).await?))
}

/// DELETE `/api/objects/{id}`
pub async fn delete_object(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    state.objects.delete_object(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET `/api/objects/{id}/raw` as a streaming response.
///
/// Errors up to and including the first decoded chunk become regular error
/// responses; after that the body is piped from a background task that
/// holds the read lock until the transfer ends.
pub async fn read_raw(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(q): Query<RawQuery>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let reader = state.objects.open_object(id, passphrase(&headers)).await?;
    let meta = reader.metadata().clone();

    let (pipe, body) = tokio::io::duplex(RESPONSE_PIPE_LEN);
    tokio::spawn(async move {
        if let Err(err) = reader.copy_to(pipe).await {
            warn!("raw read of object {} failed mid-stream: {}", id, err);
        }
    });

    let mut response = Response::new(Body::from_stream(ReaderStream::new(body)));
    set_raw_headers(response.headers_mut(), &meta, q.disposition.as_deref());
    Ok(response)
}

/// PUT `/api/objects/{id}/raw` with a multipart `content` field.
pub async fn overwrite_raw(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<StatusCode, AppError> {
    let passphrase = passphrase(&headers);

    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        if field.name() != Some(CONTENT_FIELD) {
            continue;
        }
        let filename = field.file_name().map(str::to_owned);
        state
            .objects
            .overwrite_object(id, filename.as_deref(), field_stream(field), None, passphrase)
            .await?;
        return Ok(StatusCode::NO_CONTENT);
    }

    Err(missing_content())
}

fn passphrase(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(ENCRYPTION_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
}

fn field_stream(field: Field<'_>) -> impl Stream<Item = io::Result<Bytes>> {
    field.map(|chunk| chunk.map_err(|err| io::Error::other(err.body_text())))
}

fn multipart_error(err: MultipartError) -> AppError {
    AppError::new(err.status(), err.body_text())
}

fn missing_content() -> AppError {
    AppError::bad_request(format!("multipart field `{}` is missing", CONTENT_FIELD))
}

fn set_raw_headers(headers: &mut HeaderMap, meta: &RawObjectMetadata, disposition: Option<&str>) {
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(&meta.content_type)
            .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream")),
    );
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(meta.content_length));
    if let Ok(value) = HeaderValue::from_str(&content_disposition(&meta.name, disposition)) {
        headers.insert(header::CONTENT_DISPOSITION, value);
    }
}

/// `attachment; filename="..."` with an RFC 5987 `filename*` for non-ASCII
/// names.
fn content_disposition(name: &str, disposition: Option<&str>) -> String {
    let kind = match disposition {
        Some("inline") => "inline",
        _ => "attachment",
    };
    let fallback: String = name
        .chars()
        .map(|c| match c {
            '"' | '\\' => '_',
            c if c.is_ascii() && !c.is_ascii_control() => c,
            _ => '_',
        })
        .collect();

    if name.is_ascii() {
        format!("{kind}; filename=\"{fallback}\"")
    } else {
        format!(
            "{kind}; filename=\"{fallback}\"; filename*=UTF-8''{}",
            urlencoding::encode(name)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        models::group::GroupInput,
        services::test_support::{Harness, body},
    };

    #[test]
    fn disposition_variants() {
        assert_eq!(
            content_disposition("photo.png", None),
            "attachment; filename=\"photo.png\""
        );
        assert_eq!(
            content_disposition("a\"b.txt", Some("inline")),
            "inline; filename=\"a_b.txt\""
        );
        assert_eq!(
            content_disposition("ñ.txt", Some("bogus")),
            "attachment; filename=\"_.txt\"; filename*=UTF-8''%C3%B1.txt"
        );
        assert_eq!(
            content_disposition("año 1 (v2).pdf", None),
            "attachment; filename=\"a_o 1 (v2).pdf\"; filename*=UTF-8''a%C3%B1o%201%20%28v2%29.pdf"
        );
    }

    #[test]
    fn empty_passphrase_header_is_ignored() {
        let mut headers = HeaderMap::new();
        assert_eq!(passphrase(&headers), None);
        headers.insert(ENCRYPTION_KEY_HEADER, HeaderValue::from_static(""));
        assert_eq!(passphrase(&headers), None);
        headers.insert(ENCRYPTION_KEY_HEADER, HeaderValue::from_static("pw"));
        assert_eq!(passphrase(&headers), Some("pw"));
    }

    #[tokio::test]
    async fn raw_read_streams_body_with_headers() {
        let h = Harness::new().await;
        h.groups
            .create_group(GroupInput {
                name: "images".into(),
                metadata: Vec::new(),
            })
            .await
            .unwrap();
        let data = vec![0x42u8; 100_000];
        let object = h
            .objects
            .create_object("images", Some("photo.png"), body(&data), None, Some("pw"))
            .await
            .unwrap();

        let mut headers = HeaderMap::new();
        headers.insert(ENCRYPTION_KEY_HEADER, HeaderValue::from_static("pw"));
        let response = read_raw(
            State(AppState::from(&h)),
            Path(object.id),
            Query(RawQuery { disposition: None }),
            headers,
        )
        .await
        .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "image/png");
        assert_eq!(response.headers()[header::CONTENT_LENGTH], "100000");
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(bytes.len(), data.len());
        assert!(bytes.iter().all(|b| *b == 0x42));
    }

    #[tokio::test]
    async fn raw_read_reports_errors_before_streaming() {
        let h = Harness::new().await;
        h.groups
            .create_group(GroupInput {
                name: "vault".into(),
                metadata: Vec::new(),
            })
            .await
            .unwrap();
        let object = h
            .objects
            .create_object("vault", Some("a.txt"), body(b"secret"), None, Some("pw"))
            .await
            .unwrap();

        let no_key = read_raw(
            State(AppState::from(&h)),
            Path(object.id),
            Query(RawQuery { disposition: None }),
            HeaderMap::new(),
        )
        .await
        .unwrap_err();
        assert_eq!(no_key.status, StatusCode::BAD_REQUEST);

        let mut headers = HeaderMap::new();
        headers.insert(ENCRYPTION_KEY_HEADER, HeaderValue::from_static("nope"));
        let wrong_key = read_raw(
            State(AppState::from(&h)),
            Path(object.id),
            Query(RawQuery { disposition: None }),
            headers,
        )
        .await
        .unwrap_err();
        assert_eq!(wrong_key.status, StatusCode::UNPROCESSABLE_ENTITY);

        let missing = read_raw(
            State(AppState::from(&h)),
            Path(Uuid::new_v4()),
            Query(RawQuery { disposition: None }),
            HeaderMap::new(),
        )
        .await
        .unwrap_err();
        assert_eq!(missing.status, StatusCode::NOT_FOUND);
    }
}
