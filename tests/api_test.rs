use axum::body::Body;
use axum::extract::ConnectInfo;
use axum::http::{Request, StatusCode, header};
use http_body_util::BodyExt;
use std::net::SocketAddr;
use tank::config::{Config, Environment};
use tank::storage::Storage;
use tower::ServiceExt;

fn test_config(root: std::path::PathBuf, trust_proxy: bool) -> Config {
    Config {
        port: 0,
        bind_address: "127.0.0.1".to_string(),
        storage_root: root,
        env: Environment::Development,
        log_level: "debug".to_string(),
        log_dir: None,
        trust_proxy,
        max_upload_files: 50,
        max_upload_bytes: 1024,
    }
}

fn test_app(trust_proxy: bool) -> (axum::Router, tempfile::TempDir) {
    let dir = tempfile::TempDir::new().unwrap();
    let storage = Storage::open(dir.path()).unwrap();
    let app = tank::create_app_with_storage(
        test_config(dir.path().to_path_buf(), trust_proxy),
        storage,
    );
    (app, dir)
}

/// 接続元アドレス付きのリクエスト（serve の into_make_service_with_connect_info 相当）
fn request_from(addr: &str, uri: &str) -> Request<Body> {
    let mut req = Request::builder().uri(uri).body(Body::empty()).unwrap();
    let addr: SocketAddr = addr.parse().unwrap();
    req.extensions_mut().insert(ConnectInfo(addr));
    req
}

// ============================================================
// ローカルネットワーク制限
// ============================================================

#[tokio::test]
async fn private_addresses_allowed() {
    let (app, _dir) = test_app(false);
    for addr in [
        "127.0.0.1:5000",
        "192.168.1.10:5000",
        "10.0.0.7:5000",
        "[::1]:5000",
        "[fe80::1]:5000",
        "[::ffff:192.168.0.3]:5000",
    ] {
        let resp = app
            .clone()
            .oneshot(request_from(addr, "/api/browse"))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK, "{addr}");
    }
}

#[tokio::test]
async fn public_address_blocked() {
    let (app, _dir) = test_app(false);
    let resp = app
        .oneshot(request_from("8.8.8.8:443", "/api/browse"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);

    let body = resp.into_body().collect().await.unwrap().to_bytes();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["error"], "Access denied: Local network only");
}

#[tokio::test]
async fn public_address_blocked_for_static_files() {
    let (app, _dir) = test_app(false);
    let resp = app
        .oneshot(request_from("[2001:db8::5]:80", "/"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn unknown_peer_allowed() {
    let (app, _dir) = test_app(false);
    let req = Request::builder()
        .uri("/api/browse")
        .body(Body::empty())
        .unwrap();
    let resp = app.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
}

#[tokio::test]
async fn forwarded_for_ignored_without_trust_proxy() {
    let (app, _dir) = test_app(false);
    let mut req = request_from("192.168.1.2:4000", "/api/browse");
    req.headers_mut()
        .insert("x-forwarded-for", "8.8.8.8".parse().unwrap());
    let resp = app.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
}

#[tokio::test]
async fn forwarded_for_used_with_trust_proxy() {
    let (app, _dir) = test_app(true);

    let mut req = request_from("127.0.0.1:4000", "/api/browse");
    req.headers_mut()
        .insert("x-forwarded-for", "8.8.8.8, 127.0.0.1".parse().unwrap());
    let resp = app.clone().oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);

    let mut req = request_from("127.0.0.1:4000", "/api/browse");
    req.headers_mut()
        .insert("x-forwarded-for", "192.168.0.20".parse().unwrap());
    let resp = app.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
}

// ============================================================
// セキュリティヘッダー
// ============================================================

#[tokio::test]
async fn security_headers_on_every_response() {
    let (app, _dir) = test_app(false);
    for (addr, uri) in [
        ("127.0.0.1:1", "/"),
        ("127.0.0.1:1", "/api/browse/missing"),
        ("8.8.8.8:1", "/api/tree"),
    ] {
        let resp = app.clone().oneshot(request_from(addr, uri)).await.unwrap();
        let headers = resp.headers();
        assert_eq!(headers[header::X_CONTENT_TYPE_OPTIONS], "nosniff", "{uri}");
        assert_eq!(headers[header::X_FRAME_OPTIONS], "SAMEORIGIN", "{uri}");
        assert_eq!(headers[header::X_XSS_PROTECTION], "1; mode=block", "{uri}");
    }
}

#[tokio::test]
async fn no_cors_headers() {
    let (app, _dir) = test_app(false);
    let mut req = request_from("127.0.0.1:1", "/api/tree");
    req.headers_mut()
        .insert(header::ORIGIN, "http://evil.example".parse().unwrap());
    let resp = app.oneshot(req).await.unwrap();
    assert!(
        resp.headers()
            .get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
            .is_none()
    );
}

// ============================================================
// 静的ファイル
// ============================================================

#[tokio::test]
async fn static_index() {
    let (app, _dir) = test_app(false);
    let resp = app.oneshot(request_from("127.0.0.1:1", "/")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert!(
        resp.headers()[header::CONTENT_TYPE]
            .to_str()
            .unwrap()
            .contains("text/html")
    );
    let body = resp.into_body().collect().await.unwrap().to_bytes();
    assert!(String::from_utf8_lossy(&body).contains("<title>Tank</title>"));
}

#[tokio::test]
async fn static_js() {
    let (app, _dir) = test_app(false);
    let resp = app
        .oneshot(request_from("127.0.0.1:1", "/app.js"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert!(
        resp.headers()[header::CONTENT_TYPE]
            .to_str()
            .unwrap()
            .contains("javascript")
    );
}

#[tokio::test]
async fn static_404_and_client_routes() {
    let (app, _dir) = test_app(false);

    let resp = app
        .clone()
        .oneshot(request_from("127.0.0.1:1", "/missing.js"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    let resp = app
        .clone()
        .oneshot(request_from("127.0.0.1:1", "/api/unknown"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    // 拡張子のないパスはクライアント側ルートとして index.html
    let resp = app
        .oneshot(request_from("127.0.0.1:1", "/docs/reports"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
}
