use axum::{
    Json,
    body::Body,
    extract::{Path, State},
    http::{StatusCode, header},
    response::Response,
};
use serde_json::{Value, json};
use std::io::ErrorKind;
use tokio_util::io::ReaderStream;
use tracing::{debug, info, warn};

use crate::errors::{AppError, AppResult};
use crate::state::AppState;

const PLAYLIST_CONTENT_TYPE: &str = "application/vnd.apple.mpegurl";
const SEGMENT_CACHE_CONTROL: &str = "public, max-age=3600";

/// Serve the live playlist, starting the conversion if needed.
pub async fn playlist_handler(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> AppResult<Response> {
    debug!(key = %key, "playlist request");
    let artifact = state.supervisor().request_session(&key).await?;

    let content = match tokio::fs::read(&artifact.playlist).await {
        Ok(content) => content,
        // The session stopped between the readiness check and the read.
        Err(e) if e.kind() == ErrorKind::NotFound => {
            return Err(AppError::unavailable(format!(
                "stream {key} is restarting"
            )));
        }
        Err(e) => {
            warn!(key = %key, "failed to read playlist: {}", e);
            return Err(e.into());
        }
    };

    Response::builder()
        .header(header::CONTENT_TYPE, PLAYLIST_CONTENT_TYPE)
        .header(header::CACHE_CONTROL, "no-cache")
        .body(Body::from(content))
        .map_err(|e| AppError::internal(e.to_string()))
}

/// Serve a segment of a running session. Only a segment that is actually
/// served counts as viewer activity.
pub async fn segment_handler(
    State(state): State<AppState>,
    Path((key, file)): Path<(String, String)>,
) -> AppResult<Response> {
    let supervisor = state.supervisor();
    let paths = supervisor
        .paths(&key)?
        .ok_or_else(|| AppError::not_found(format!("no active stream {key}")))?;
    let path = paths
        .artifact(&file)
        .ok_or_else(|| AppError::bad_request(format!("invalid file name {file}")))?;

    let file_handle = match tokio::fs::File::open(&path).await {
        Ok(handle) => handle,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            return Err(AppError::not_found(format!("{file} not found")));
        }
        Err(e) => return Err(e.into()),
    };

    if supervisor.touch(&key)?.is_none() {
        debug!(key = %key, "session stopped while serving {}", file);
        return Err(AppError::not_found(format!("no active stream {key}")));
    }

    let (content_type, cache_control) = content_headers(&file);
    Response::builder()
        .header(header::CONTENT_TYPE, content_type)
        .header(header::CACHE_CONTROL, cache_control)
        .body(Body::from_stream(ReaderStream::new(file_handle)))
        .map_err(|e| AppError::internal(e.to_string()))
}

pub async fn stop_handler(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> AppResult<(StatusCode, Json<Value>)> {
    if !state.supervisor().stop(&key)? {
        return Err(AppError::not_found(format!("no active stream {key}")));
    }

    info!(key = %key, "stop requested over HTTP");
    Ok((
        StatusCode::ACCEPTED,
        Json(json!({ "key": key, "status": "stopping" })),
    ))
}

fn content_headers(file: &str) -> (&'static str, &'static str) {
    match file.rsplit_once('.').map(|(_, ext)| ext) {
        Some("m3u8") => (PLAYLIST_CONTENT_TYPE, "no-cache"),
        Some("ts") => ("video/MP2T", SEGMENT_CACHE_CONTROL),
        Some("m4s") => ("video/iso.segment", SEGMENT_CACHE_CONTROL),
        Some("mp4") => ("video/mp4", SEGMENT_CACHE_CONTROL),
        Some("aac") => ("audio/aac", SEGMENT_CACHE_CONTROL),
        _ => ("application/octet-stream", SEGMENT_CACHE_CONTROL),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_type_follows_extension() {
        assert_eq!(content_headers("segment3.ts").0, "video/MP2T");
        assert_eq!(content_headers("index.m3u8"), (PLAYLIST_CONTENT_TYPE, "no-cache"));
        assert_eq!(content_headers("init").0, "application/octet-stream");
    }
}
