use axum::{
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use rust_embed::Embed;

#[derive(Embed)]
#[folder = "frontend/"]
struct ClientAssets;

/// 静的ファイル配信ハンドラ（未知のパスは SPA として index.html を返す）
pub async fn serve_static(axum::extract::Path(path): axum::extract::Path<String>) -> Response {
    if ClientAssets::get(&path).is_some() {
        serve_file(&path)
    } else if path.starts_with("api/") || path.contains('.') {
        StatusCode::NOT_FOUND.into_response()
    } else {
        serve_file("index.html")
    }
}

/// index.html 配信
pub async fn serve_index() -> Response {
    serve_file("index.html")
}

fn serve_file(path: &str) -> Response {
    match ClientAssets::get(path) {
        Some(file) => {
            let mime = mime_guess::from_path(path).first_or_octet_stream();
            (
                StatusCode::OK,
                [(header::CONTENT_TYPE, mime.as_ref().to_string())],
                file.data.to_vec(),
            )
                .into_response()
        }
        None => StatusCode::NOT_FOUND.into_response(),
    }
}
