use std::io;

/// ストレージ操作のエラー分類
#[derive(Debug, thiserror::Error)]
pub enum FsError {
    /// パスがストレージルートの外を指している
    #[error("Access denied")]
    AccessDenied,
    #[error("Invalid name")]
    InvalidName,
    #[error("Not found")]
    NotFound,
    #[error("Not a directory")]
    NotADirectory,
    #[error("An item with that name already exists")]
    NameConflict,
    #[error("Cannot move an item into itself")]
    SelfMove,
    /// ルート削除など、許可されない操作
    #[error("{0}")]
    Forbidden(&'static str),
    #[error("Too many files: max {0} per request")]
    TooManyFiles(usize),
    #[error("File too large: max {0} bytes")]
    FileTooLarge(u64),
    #[error("I/O error: {0}")]
    Io(io::Error),
}

impl From<io::Error> for FsError {
    fn from(e: io::Error) -> Self {
        match e.kind() {
            // `file.txt/child` のようにファイルを経由するパスも「存在しない」
            io::ErrorKind::NotFound | io::ErrorKind::NotADirectory => FsError::NotFound,
            _ => FsError::Io(e),
        }
    }
}

pub type FsResult<T> = Result<T, FsError>;
