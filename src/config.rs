use std::env;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::storage::upload::{DEFAULT_MAX_FILE_SIZE, DEFAULT_MAX_FILES, UploadLimits};

#[derive(Debug, Clone, PartialEq)]
pub enum Environment {
    Development,
    Production,
}

impl FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "development" | "dev" => Ok(Environment::Development),
            "production" | "prod" => Ok(Environment::Production),
            _ => Err(format!("Unknown environment: {}", s)),
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Environment::Development => write!(f, "development"),
            Environment::Production => write!(f, "production"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub bind_address: String,
    /// 全操作の基点となるストレージルート
    pub storage_root: PathBuf,
    pub env: Environment,
    pub log_level: String,
    /// 設定時はローテーションするログファイルも出力
    pub log_dir: Option<PathBuf>,
    /// X-Forwarded-For を接続元として信頼する（リバースプロキシ配下用）
    pub trust_proxy: bool,
    pub max_upload_files: usize,
    pub max_upload_bytes: u64,
}

impl Config {
    pub fn from_env() -> Self {
        let env = env::var("TANK_ENV")
            .ok()
            .and_then(|v| Environment::from_str(&v).ok())
            .unwrap_or(Environment::Development);

        let port = parse_var::<u16>("TANK_PORT").unwrap_or(8008);
        let bind_address = env::var("TANK_BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0".to_string());
        let storage_root = env::var("TANK_STORAGE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("storage"));

        let default_log_level = match env {
            Environment::Development => "debug",
            Environment::Production => "info",
        };
        let log_level =
            env::var("TANK_LOG_LEVEL").unwrap_or_else(|_| default_log_level.to_string());
        let log_dir = env::var("TANK_LOG_DIR")
            .ok()
            .filter(|v| !v.is_empty())
            .map(PathBuf::from);

        let trust_proxy = env::var("TANK_TRUST_PROXY")
            .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes" | "on"))
            .unwrap_or(false);

        let max_upload_files = parse_var::<usize>("TANK_MAX_UPLOAD_FILES")
            .filter(|n| *n > 0)
            .unwrap_or(DEFAULT_MAX_FILES);
        let max_upload_bytes = parse_var::<u64>("TANK_MAX_UPLOAD_BYTES")
            .filter(|n| *n > 0)
            .unwrap_or(DEFAULT_MAX_FILE_SIZE);

        Self {
            port,
            bind_address,
            storage_root,
            env,
            log_level,
            log_dir,
            trust_proxy,
            max_upload_files,
            max_upload_bytes,
        }
    }

    pub fn upload_limits(&self) -> UploadLimits {
        UploadLimits {
            max_files: self.max_upload_files,
            max_file_size: self.max_upload_bytes,
        }
    }
}

fn parse_var<T: FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|v| v.trim().parse().ok())
}
