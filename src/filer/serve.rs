use axum::{
    body::Body,
    extract::{Path, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::Response,
};
use std::io::SeekFrom;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio_util::io::ReaderStream;

use super::api::{ApiError, err, fs_err, resolve};
use crate::AppState;
use crate::storage::Resolved;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// ブラウザ内プレビュー（画像・動画・音声）
    Inline,
    Attachment,
}

/// GET /media/{path}
pub async fn media(
    State(state): State<Arc<AppState>>,
    Path(path): Path<String>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let target = resolve(&state, path).await?;
    file_response(&target, &headers, Disposition::Inline).await
}

/// GET /api/download/{path}
pub async fn download(
    State(state): State<Arc<AppState>>,
    Path(path): Path<String>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let target = resolve(&state, path).await?;
    file_response(&target, &headers, Disposition::Attachment).await
}

/// ファイルをストリーム配信する。単一の Range 指定に対応（動画のシーク用）。
pub async fn file_response(
    target: &Resolved,
    headers: &HeaderMap,
    disposition: Disposition,
) -> Result<Response, ApiError> {
    let metadata = tokio::fs::metadata(&target.abs)
        .await
        .map_err(|e| fs_err(e.into()))?;
    if !metadata.is_file() {
        return Err(err(StatusCode::NOT_FOUND, "Not a file"));
    }
    let file_size = metadata.len();

    let range = match parse_range(headers.get(header::RANGE), file_size) {
        Ok(range) => range,
        Err(()) => {
            return Response::builder()
                .status(StatusCode::RANGE_NOT_SATISFIABLE)
                .header(header::CONTENT_RANGE, format!("bytes */{}", file_size))
                .body(Body::empty())
                .map_err(|_| err(StatusCode::INTERNAL_SERVER_ERROR, "Internal error"));
        }
    };

    let mut file = tokio::fs::File::open(&target.abs)
        .await
        .map_err(|e| fs_err(e.into()))?;

    let mime = mime_guess::from_path(&target.abs)
        .first_or_octet_stream()
        .to_string();
    let mut builder = Response::builder()
        .header(header::CONTENT_TYPE, mime)
        .header(header::ACCEPT_RANGES, "bytes")
        .header(
            header::CONTENT_DISPOSITION,
            content_disposition(target.name(), disposition),
        );
    if let Ok(modified) = metadata.modified() {
        let dt: chrono::DateTime<chrono::Utc> = modified.into();
        builder = builder.header(
            header::LAST_MODIFIED,
            dt.format("%a, %d %b %Y %H:%M:%S GMT").to_string(),
        );
    }

    let (status, body) = match range {
        Some((start, end)) => {
            let length = end - start + 1;
            file.seek(SeekFrom::Start(start))
                .await
                .map_err(|e| fs_err(e.into()))?;
            builder = builder
                .header(
                    header::CONTENT_RANGE,
                    format!("bytes {}-{}/{}", start, end, file_size),
                )
                .header(header::CONTENT_LENGTH, length.to_string());
            (
                StatusCode::PARTIAL_CONTENT,
                Body::from_stream(ReaderStream::new(file.take(length))),
            )
        }
        None => {
            builder = builder.header(header::CONTENT_LENGTH, file_size.to_string());
            (StatusCode::OK, Body::from_stream(ReaderStream::new(file)))
        }
    };

    tracing::debug!(
        "filer: serve {} ({} bytes, {:?})",
        target.abs.display(),
        file_size,
        range
    );
    builder
        .status(status)
        .body(body)
        .map_err(|_| err(StatusCode::INTERNAL_SERVER_ERROR, "Internal error"))
}

/// `Content-Disposition` を組み立てる。
/// ヘッダーインジェクション防止: `filename` は ASCII 英数字 + 安全な記号のみ、
/// 元の名前は RFC 5987 形式の `filename*` で渡す。
fn content_disposition(file_name: &str, disposition: Disposition) -> String {
    let kind = match disposition {
        Disposition::Inline => "inline",
        Disposition::Attachment => "attachment",
    };

    let safe_name: String = file_name
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, ' ' | '.' | '_' | '-'))
        .collect();
    let safe_name = if safe_name.trim().is_empty() {
        "download".to_string()
    } else {
        safe_name
    };

    format!(
        "{}; filename=\"{}\"; filename*=UTF-8''{}",
        kind,
        safe_name,
        urlencoding::encode(file_name)
    )
}

/// `Range: bytes=a-b` / `bytes=a-` / `bytes=-n` を解釈する。
/// 複数範囲や解釈できない指定は無視して全体を返す。満たせない範囲は `Err`。
fn parse_range(value: Option<&HeaderValue>, file_size: u64) -> Result<Option<(u64, u64)>, ()> {
    let Some(spec) = value
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().strip_prefix("bytes="))
    else {
        return Ok(None);
    };
    if spec.contains(',') {
        return Ok(None);
    }
    let Some((start, end)) = spec.split_once('-') else {
        return Ok(None);
    };
    let (start, end) = (start.trim(), end.trim());

    if file_size == 0 {
        return Err(());
    }
    let last = file_size - 1;

    let range = if start.is_empty() {
        let Ok(suffix) = end.parse::<u64>() else {
            return Ok(None);
        };
        if suffix == 0 {
            return Err(());
        }
        (file_size.saturating_sub(suffix), last)
    } else {
        let Ok(start) = start.parse::<u64>() else {
            return Ok(None);
        };
        let end = if end.is_empty() {
            last
        } else {
            match end.parse::<u64>() {
                Ok(end) => end.min(last),
                Err(_) => return Ok(None),
            }
        };
        if start > last || start > end {
            return Err(());
        }
        (start, end)
    };
    Ok(Some(range))
}
