use axum::{
    Json,
    extract::{ConnectInfo, State},
    http::{HeaderMap, HeaderValue, Request, StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;

use crate::AppState;
use crate::filer::api::ErrorResponse;

/// 接続元 IP がローカルネットワークか判定する
pub fn is_local_network(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => is_local_v4(v4),
        IpAddr::V6(v6) => {
            // ::ffff:192.168.x.x 形式（デュアルスタック）
            if let Some(v4) = v6.to_ipv4_mapped() {
                return is_local_v4(v4);
            }
            is_local_v6(v6)
        }
    }
}

fn is_local_v4(ip: Ipv4Addr) -> bool {
    ip.is_loopback() || ip.is_private()
}

fn is_local_v6(ip: Ipv6Addr) -> bool {
    let first = ip.segments()[0];
    ip.is_loopback()
        // fc00::/7 (ULA)
        || (first & 0xfe00) == 0xfc00
        // fe80::/10 (link-local)
        || (first & 0xffc0) == 0xfe80
}

fn forwarded_ip(headers: &HeaderMap) -> Option<IpAddr> {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .and_then(|v| v.parse::<IpAddr>().ok())
}

/// ローカルネットワーク外からのアクセスを拒否するミドルウェア
///
/// 接続元が取得できない場合（テストの oneshot など）は通過させる。
pub async fn origin_filter(
    State(state): State<Arc<AppState>>,
    req: Request<axum::body::Body>,
    next: Next,
) -> Response {
    let connect_ip = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip());
    let client_ip = if state.config.trust_proxy {
        forwarded_ip(req.headers()).or(connect_ip)
    } else {
        connect_ip
    };

    match client_ip {
        Some(ip) if !is_local_network(ip) => {
            tracing::warn!("Blocked non-local request from {ip} to {}", req.uri().path());
            (
                StatusCode::FORBIDDEN,
                Json(ErrorResponse::new("Access denied: Local network only")),
            )
                .into_response()
        }
        _ => next.run(req).await,
    }
}

/// 全レスポンスにセキュリティヘッダーを付与
pub async fn security_headers(req: Request<axum::body::Body>, next: Next) -> Response {
    let mut res = next.run(req).await;
    let headers = res.headers_mut();
    headers.insert(
        header::X_CONTENT_TYPE_OPTIONS,
        HeaderValue::from_static("nosniff"),
    );
    headers.insert(
        header::X_FRAME_OPTIONS,
        HeaderValue::from_static("SAMEORIGIN"),
    );
    headers.insert(
        header::X_XSS_PROTECTION,
        HeaderValue::from_static("1; mode=block"),
    );
    res
}
