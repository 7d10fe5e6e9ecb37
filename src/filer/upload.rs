use axum::{
    Json,
    extract::{
        Multipart, State,
        multipart::{Field, MultipartError},
    },
    http::StatusCode,
};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;

use super::api::{ApiError, err, fs_err, join_err};
use crate::AppState;
use crate::storage::upload::{IncomingFile, Staging, UploadLimits, UploadedFile, ingest};

#[derive(Serialize)]
pub struct UploadResponse {
    success: bool,
    files: Vec<UploadedFile>,
    message: String,
}

fn multipart_err(e: MultipartError) -> ApiError {
    err(
        StatusCode::BAD_REQUEST,
        &format!("Multipart error: {}", e.body_text()),
    )
}

/// 受信したファイル部（一時領域に書き出し済み）
struct ReceivedPart {
    file_name: String,
    staged: PathBuf,
    size: u64,
}

/// POST /api/upload (multipart)
///
/// フィールド: `path`（保存先、省略時ルート）、`files`（複数可）、
/// `relativePaths`（フォルダアップロード時、`files` と同じ順序）
pub async fn upload(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, ApiError> {
    let limits = state.config.upload_limits();
    let staging = {
        let state = Arc::clone(&state);
        tokio::task::spawn_blocking(move || Staging::create(&state.storage))
            .await
            .map_err(join_err)?
            .map_err(|e| fs_err(e.into()))?
    };

    let mut target = String::new();
    let mut parts: Vec<ReceivedPart> = Vec::new();
    let mut relative_paths: Vec<String> = Vec::new();

    while let Some(mut field) = multipart.next_field().await.map_err(multipart_err)? {
        let name = field.name().unwrap_or("").to_string();
        match name.as_str() {
            "path" => {
                target = field.text().await.map_err(multipart_err)?;
            }
            "relativePaths" | "relativePaths[]" => {
                relative_paths.push(field.text().await.map_err(multipart_err)?);
            }
            "files" | "files[]" | "file" => {
                // 上限超過は書き込み前に弾く
                limits.check_count(parts.len() + 1).map_err(fs_err)?;
                let file_name = field.file_name().unwrap_or("upload").to_string();
                let staged = staging.part_path(parts.len());
                let size = receive_part(&mut field, &staged, &limits).await?;
                parts.push(ReceivedPart {
                    file_name,
                    staged,
                    size,
                });
            }
            other => {
                tracing::debug!("upload: ignoring field {other:?}");
            }
        }
    }

    if parts.is_empty() {
        return Err(err(StatusCode::BAD_REQUEST, "No files uploaded"));
    }

    let files: Vec<IncomingFile> = parts
        .into_iter()
        .enumerate()
        .map(|(i, part)| IncomingFile {
            file_name: part.file_name,
            relative_path: relative_paths.get(i).cloned(),
            staged: part.staged,
            size: part.size,
        })
        .collect();

    let uploaded = tokio::task::spawn_blocking(move || {
        let result = ingest(&state.storage, &limits, &staging, &target, files);
        drop(staging);
        result
    })
    .await
    .map_err(join_err)?
    .map_err(fs_err)?;

    let message = format!("{} file(s) uploaded successfully", uploaded.len());
    Ok(Json(UploadResponse {
        success: true,
        files: uploaded,
        message,
    }))
}

/// 1 ファイル分をチャンク単位で一時ファイルへ書き出す。サイズ上限は受信しながら検査。
async fn receive_part(
    field: &mut Field<'_>,
    dest: &Path,
    limits: &UploadLimits,
) -> Result<u64, ApiError> {
    let mut file = tokio::fs::File::create(dest)
        .await
        .map_err(|e| fs_err(e.into()))?;
    let mut size: u64 = 0;

    while let Some(chunk) = field.chunk().await.map_err(multipart_err)? {
        size += chunk.len() as u64;
        limits.check_size(size).map_err(fs_err)?;
        file.write_all(&chunk).await.map_err(|e| fs_err(e.into()))?;
    }
    file.flush().await.map_err(|e| fs_err(e.into()))?;
    Ok(size)
}
