pub mod assets;
pub mod config;
pub mod filer;
pub mod guard;
pub mod storage;

use axum::{
    Router,
    extract::DefaultBodyLimit,
    middleware,
    routing::{delete, get, post},
};
use config::Config;
use std::io;
use std::sync::Arc;
use storage::Storage;

pub struct AppState {
    pub config: Config,
    pub storage: Storage,
}

/// アプリケーション Router を構築（ストレージルートは設定から作成）
pub fn create_app(config: Config) -> io::Result<Router> {
    let storage = Storage::open(&config.storage_root)?;
    Ok(create_app_with_storage(config, storage))
}

/// テスト用: 任意のストレージで Router を構築
pub fn create_app_with_storage(config: Config, storage: Storage) -> Router {
    let state = Arc::new(AppState { config, storage });

    let api_routes = Router::new()
        .route("/api/browse", get(filer::api::browse_root))
        .route("/api/browse/{*path}", get(filer::api::browse))
        .route("/api/tree", get(filer::api::tree))
        // 大容量ファイル向けにボディ上限を外す（件数・サイズは UploadLimits で検査）
        .route(
            "/api/upload",
            post(filer::upload::upload).layer(DefaultBodyLimit::disable()),
        )
        .route("/api/create-folder", post(filer::api::create_folder))
        .route("/api/rename", post(filer::api::rename))
        .route("/api/move", post(filer::api::move_item))
        .route("/api/delete", delete(filer::api::delete))
        .route("/api/download/{*path}", get(filer::serve::download))
        .route("/media/{*path}", get(filer::serve::media));

    let static_routes = Router::new()
        .route("/", get(assets::serve_index))
        .route("/{*path}", get(assets::serve_static));

    Router::new()
        .merge(api_routes)
        .merge(static_routes)
        .layer(middleware::from_fn_with_state(
            Arc::clone(&state),
            guard::origin_filter,
        ))
        .layer(middleware::from_fn(guard::security_headers))
        .with_state(state)
}
