use axum::{
    Json,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::serve::{Disposition, file_response};
use crate::AppState;
use crate::storage::listing::{self, Entry, TreeNode};
use crate::storage::{FsError, Resolved, ops};

// --- リクエスト/レスポンス型 ---

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BrowseListing {
    current_path: String,
    items: Vec<Entry>,
}

#[derive(Serialize)]
pub struct TreeResponse {
    tree: Vec<TreeNode>,
}

#[derive(Deserialize)]
pub struct CreateFolderRequest {
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub name: String,
}

#[derive(Serialize)]
pub struct CreateFolderResponse {
    success: bool,
    message: String,
    path: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenameRequest {
    #[serde(default)]
    pub old_path: String,
    #[serde(default)]
    pub new_name: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MoveRequest {
    #[serde(default)]
    pub source_path: String,
    /// 空文字はルートを意味するので「未指定」と区別する
    pub destination_path: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PathChangeResponse {
    success: bool,
    message: String,
    new_path: String,
}

#[derive(Deserialize)]
pub struct DeleteRequest {
    #[serde(default)]
    pub path: String,
}

#[derive(Serialize)]
pub struct SuccessResponse {
    success: bool,
    message: String,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    error: String,
}

impl ErrorResponse {
    pub fn new(msg: &str) -> Self {
        Self {
            error: msg.to_string(),
        }
    }
}

/// 共通エラー型
pub type ApiError = (StatusCode, Json<ErrorResponse>);

pub(crate) fn err(status: StatusCode, msg: &str) -> ApiError {
    (status, Json(ErrorResponse::new(msg)))
}

/// ストレージエラーを API エラーに変換（I/O 詳細はログのみ、クライアントにはジェネリックメッセージ）
pub(crate) fn fs_err(e: FsError) -> ApiError {
    let status = match &e {
        FsError::AccessDenied => StatusCode::FORBIDDEN,
        FsError::NotFound => StatusCode::NOT_FOUND,
        FsError::FileTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
        FsError::InvalidName
        | FsError::NotADirectory
        | FsError::NameConflict
        | FsError::SelfMove
        | FsError::Forbidden(_)
        | FsError::TooManyFiles(_) => StatusCode::BAD_REQUEST,
        FsError::Io(io) => {
            tracing::error!("Storage I/O error: {io}");
            return err(StatusCode::INTERNAL_SERVER_ERROR, "I/O error");
        }
    };
    err(status, &e.to_string())
}

pub(crate) fn join_err(_: tokio::task::JoinError) -> ApiError {
    err(StatusCode::INTERNAL_SERVER_ERROR, "Internal error")
}

/// パス検証だけをブロッキングスレッドで行う（canonicalize がシステムコールを伴うため）
pub(crate) async fn resolve(state: &Arc<AppState>, raw: String) -> Result<Resolved, ApiError> {
    let state = Arc::clone(state);
    tokio::task::spawn_blocking(move || state.storage.resolve(&raw).map_err(fs_err))
        .await
        .map_err(join_err)?
}

// --- API ハンドラ ---

/// GET /api/browse
pub async fn browse_root(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    browse_path(state, String::new(), headers).await
}

/// GET /api/browse/{path}
pub async fn browse(
    State(state): State<Arc<AppState>>,
    Path(path): Path<String>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    browse_path(state, path, headers).await
}

/// ディレクトリなら一覧 JSON、ファイルなら中身をそのまま返す
async fn browse_path(
    state: Arc<AppState>,
    raw: String,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let target = resolve(&state, raw).await?;

    let listing = tokio::task::spawn_blocking(move || read_listing(target))
        .await
        .map_err(join_err)??;

    match listing {
        Ok(listing) => Ok(Json(listing).into_response()),
        Err(file) => file_response(&file, &headers, Disposition::Inline).await,
    }
}

/// 対象がファイルの場合は `Err(target)` を返し、呼び出し側でストリーム配信する
fn read_listing(target: Resolved) -> Result<Result<BrowseListing, Resolved>, ApiError> {
    let metadata = std::fs::metadata(&target.abs).map_err(|e| fs_err(e.into()))?;
    if !metadata.is_dir() {
        return Ok(Err(target));
    }
    let items = listing::list(&target).map_err(fs_err)?;
    Ok(Ok(BrowseListing {
        current_path: target.rel,
        items,
    }))
}

/// GET /api/tree
pub async fn tree(State(state): State<Arc<AppState>>) -> Result<Json<TreeResponse>, ApiError> {
    tokio::task::spawn_blocking(move || {
        let tree = listing::build_tree(&state.storage.root_entry()).map_err(fs_err)?;
        Ok(Json(TreeResponse { tree }))
    })
    .await
    .map_err(join_err)?
}

/// POST /api/create-folder
pub async fn create_folder(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateFolderRequest>,
) -> Result<Json<CreateFolderResponse>, ApiError> {
    tokio::task::spawn_blocking(move || {
        let path = ops::create_folder(&state.storage, &req.path, &req.name).map_err(fs_err)?;
        Ok(Json(CreateFolderResponse {
            success: true,
            message: format!("Folder \"{}\" created successfully", req.name.trim()),
            path,
        }))
    })
    .await
    .map_err(join_err)?
}

/// POST /api/rename
pub async fn rename(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RenameRequest>,
) -> Result<Json<PathChangeResponse>, ApiError> {
    if req.old_path.is_empty() || req.new_name.is_empty() {
        return Err(err(
            StatusCode::BAD_REQUEST,
            "Old path and new name required",
        ));
    }

    tokio::task::spawn_blocking(move || {
        let new_path = ops::rename(&state.storage, &req.old_path, &req.new_name).map_err(fs_err)?;
        Ok(Json(PathChangeResponse {
            success: true,
            message: "Renamed successfully".to_string(),
            new_path,
        }))
    })
    .await
    .map_err(join_err)?
}

/// POST /api/move
pub async fn move_item(
    State(state): State<Arc<AppState>>,
    Json(req): Json<MoveRequest>,
) -> Result<Json<PathChangeResponse>, ApiError> {
    let destination = match req.destination_path {
        Some(d) if !req.source_path.is_empty() => d,
        _ => {
            return Err(err(
                StatusCode::BAD_REQUEST,
                "Source and destination paths required",
            ));
        }
    };

    tokio::task::spawn_blocking(move || {
        let new_path =
            ops::move_entry(&state.storage, &req.source_path, &destination).map_err(fs_err)?;
        Ok(Json(PathChangeResponse {
            success: true,
            message: "Moved successfully".to_string(),
            new_path,
        }))
    })
    .await
    .map_err(join_err)?
}

/// DELETE /api/delete
pub async fn delete(
    State(state): State<Arc<AppState>>,
    Json(req): Json<DeleteRequest>,
) -> Result<Json<SuccessResponse>, ApiError> {
    tokio::task::spawn_blocking(move || {
        ops::delete(&state.storage, &req.path).map_err(fs_err)?;
        Ok(Json(SuccessResponse {
            success: true,
            message: "Deleted successfully".to_string(),
        }))
    })
    .await
    .map_err(join_err)?
}
