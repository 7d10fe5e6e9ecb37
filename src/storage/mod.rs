//! ストレージルート配下に閉じたファイルシステム操作。
//!
//! クライアントから届くパスはすべて [`Storage::resolve`] を通してから
//! ファイルシステムに触れる。ここが唯一のトラバーサル防止ポイント。

pub mod error;
pub mod listing;
pub mod ops;
pub mod upload;

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

pub use error::{FsError, FsResult};

/// アップロード一時領域（ルート直下、一覧・ツリー・パス指定から除外）
pub const STAGING_DIR: &str = ".upload_temp";

/// ストレージルート。起動時に一度だけ正規化される。
#[derive(Debug, Clone)]
pub struct Storage {
    root: PathBuf,
}

/// 検証済みパス: 絶対パスとルート相対パス（`/` 区切り）の組
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolved {
    pub abs: PathBuf,
    pub rel: String,
}

impl Resolved {
    pub fn is_root(&self) -> bool {
        self.rel.is_empty()
    }

    /// 末尾のセグメント（ルートは空文字）
    pub fn name(&self) -> &str {
        self.rel.rsplit('/').next().unwrap_or_default()
    }

    pub fn parent(&self) -> Option<Resolved> {
        if self.is_root() {
            return None;
        }
        let rel = self
            .rel
            .rsplit_once('/')
            .map(|(parent, _)| parent.to_string())
            .unwrap_or_default();
        let abs = self.abs.parent()?.to_path_buf();
        Some(Resolved { abs, rel })
    }

    /// `self` が `other` 自身またはその子孫か
    pub fn is_within(&self, other: &Resolved) -> bool {
        other.is_root()
            || self.rel == other.rel
            || self
                .rel
                .strip_prefix(&other.rel)
                .is_some_and(|rest| rest.starts_with('/'))
    }
}

/// ルート相対パスを連結（ルートは空文字）
pub fn join_rel(parent: &str, name: &str) -> String {
    if parent.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", parent, name)
    }
}

impl Storage {
    /// ルートディレクトリを作成（なければ）して正規化する
    pub fn open(root: impl AsRef<Path>) -> io::Result<Self> {
        let root = root.as_ref();
        fs::create_dir_all(root)?;
        let root = root.canonicalize()?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn staging_dir(&self) -> PathBuf {
        self.root.join(STAGING_DIR)
    }

    /// ルート自身を指す検証済みパス
    pub fn root_entry(&self) -> Resolved {
        Resolved {
            abs: self.root.clone(),
            rel: String::new(),
        }
    }

    /// ユーザー入力のルート相対パスを検証し、絶対パスに解決する。
    ///
    /// 字句的に正規化したうえで、存在する最も深い祖先を正規化
    /// （シンボリックリンク解決）し、ルート配下に留まることを確認する。
    pub fn resolve(&self, raw: &str) -> FsResult<Resolved> {
        let segments = normalize(raw)?;

        let mut abs = self.root.clone();
        for segment in &segments {
            abs.push(segment);
        }
        self.ensure_contained(&abs)?;

        Ok(Resolved {
            abs,
            rel: segments.join("/"),
        })
    }

    fn ensure_contained(&self, abs: &Path) -> FsResult<()> {
        let mut current = abs;
        loop {
            match current.canonicalize() {
                Ok(canonical) if canonical.starts_with(&self.root) => return Ok(()),
                Ok(canonical) => {
                    tracing::warn!(
                        "storage: {} escapes root via {}",
                        abs.display(),
                        canonical.display()
                    );
                    return Err(FsError::AccessDenied);
                }
                Err(e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::NotFound | io::ErrorKind::NotADirectory
                    ) =>
                {
                    // 未作成のパス: 既存の祖先まで遡る
                    current = current.parent().ok_or(FsError::AccessDenied)?;
                    if !current.starts_with(&self.root) {
                        return Err(FsError::AccessDenied);
                    }
                }
                Err(e) => return Err(FsError::Io(e)),
            }
        }
    }
}

/// 字句的な正規化。区切り文字を `/` に統一し、`.` / `..` を畳み込む。
/// ルートより上に出る `..`、絶対パス、UNC、ドライブ指定は拒否。
fn normalize(raw: &str) -> FsResult<Vec<String>> {
    if raw.contains('\0') {
        return Err(FsError::AccessDenied);
    }

    let unified = raw.replace('\\', "/");
    if unified.starts_with("//") {
        return Err(FsError::AccessDenied);
    }
    let body = match unified.strip_prefix('/') {
        Some("") => return Ok(Vec::new()),
        Some(_) => return Err(FsError::AccessDenied),
        None => unified.as_str(),
    };

    let mut segments: Vec<String> = Vec::new();
    for segment in body.split('/') {
        match segment {
            "" | "." => continue,
            ".." => {
                if segments.pop().is_none() {
                    return Err(FsError::AccessDenied);
                }
            }
            _ => {
                if is_drive_prefix(segment) || segment == STAGING_DIR {
                    return Err(FsError::AccessDenied);
                }
                segments.push(segment.to_string());
            }
        }
    }
    Ok(segments)
}

/// `C:` / `c:foo` のようなドライブ指定
fn is_drive_prefix(segment: &str) -> bool {
    let bytes = segment.as_bytes();
    bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':'
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use tempfile::TempDir;

    fn storage() -> (Storage, TempDir) {
        let dir = TempDir::new().unwrap();
        let storage = Storage::open(dir.path()).unwrap();
        (storage, dir)
    }

    #[test]
    fn resolve_root_forms() {
        let (s, _dir) = storage();
        for raw in ["", "/", ".", "./", "a/..", "\\"] {
            let r = s.resolve(raw).unwrap();
            assert!(r.is_root(), "{raw:?} should be root");
            assert_eq!(r.abs, s.root());
        }
    }

    #[test]
    fn resolve_nested_relative() {
        let (s, _dir) = storage();
        let r = s.resolve("docs/notes/a.txt").unwrap();
        assert_eq!(r.rel, "docs/notes/a.txt");
        assert_eq!(r.abs, s.root().join("docs").join("notes").join("a.txt"));
    }

    #[test]
    fn resolve_normalizes_backslashes_and_dots() {
        let (s, _dir) = storage();
        assert_eq!(s.resolve("a\\b").unwrap().rel, "a/b");
        assert_eq!(s.resolve("a/./b/../c/").unwrap().rel, "a/c");
        assert_eq!(s.resolve("a//b").unwrap().rel, "a/b");
    }

    #[test]
    fn resolve_rejects_traversal() {
        let (s, _dir) = storage();
        for raw in [
            "..",
            "../",
            "../etc/passwd",
            "a/../../x",
            "..\\..\\windows",
            "/etc/passwd",
            "\\etc\\passwd",
            "//server/share",
            "\\\\server\\share",
            "C:",
            "C:/Windows",
            "c:\\Windows",
            "docs/D:evil",
            "a\0b",
            ".upload_temp",
            "x/.upload_temp/y",
        ] {
            assert!(
                matches!(s.resolve(raw), Err(FsError::AccessDenied)),
                "{raw:?} should be denied"
            );
        }
    }

    #[test]
    fn resolve_through_file_is_not_escape() {
        let (s, dir) = storage();
        std::fs::write(dir.path().join("file.txt"), "x").unwrap();
        let r = s.resolve("file.txt/child").unwrap();
        assert_eq!(r.rel, "file.txt/child");
    }

    #[cfg(unix)]
    #[test]
    fn resolve_rejects_symlink_escape() {
        use std::os::unix::fs::symlink;

        let outer = TempDir::new().unwrap();
        let root = outer.path().join("root");
        std::fs::create_dir(&root).unwrap();
        std::fs::write(outer.path().join("secret.txt"), "secret").unwrap();
        symlink(outer.path(), root.join("up")).unwrap();

        let s = Storage::open(&root).unwrap();
        assert!(matches!(s.resolve("up"), Err(FsError::AccessDenied)));
        assert!(matches!(
            s.resolve("up/secret.txt"),
            Err(FsError::AccessDenied)
        ));
        assert!(matches!(
            s.resolve("up/new-file"),
            Err(FsError::AccessDenied)
        ));
    }

    #[cfg(unix)]
    #[test]
    fn resolve_allows_symlink_inside_root() {
        use std::os::unix::fs::symlink;

        let (s, dir) = storage();
        std::fs::create_dir(dir.path().join("real")).unwrap();
        symlink(dir.path().join("real"), dir.path().join("alias")).unwrap();
        assert_eq!(s.resolve("alias").unwrap().rel, "alias");
    }

    #[test]
    fn resolved_helpers() {
        let (s, _dir) = storage();
        let r = s.resolve("docs/sub").unwrap();
        assert_eq!(r.name(), "sub");
        let parent = r.parent().unwrap();
        assert_eq!(parent.rel, "docs");
        assert_eq!(parent.parent().unwrap().rel, "");
        assert!(s.root_entry().parent().is_none());

        let inner = s.resolve("docs/sub/deeper").unwrap();
        assert!(inner.is_within(&r));
        assert!(r.is_within(&r));
        assert!(!s.resolve("docs/subway").unwrap().is_within(&r));
    }

    proptest! {
        #[test]
        fn escaping_paths_are_denied(
            depth in 1usize..4,
            tail in proptest::collection::vec("[a-z]{1,6}", 0..3),
        ) {
            let (s, _dir) = storage();
            let mut parts = vec![".."; depth];
            let tail: Vec<&str> = tail.iter().map(String::as_str).collect();
            parts.extend(tail);
            let raw = parts.join("/");
            prop_assert!(matches!(s.resolve(&raw), Err(FsError::AccessDenied)));
        }

        #[test]
        fn inside_paths_resolve_under_root(
            parts in proptest::collection::vec("[A-Za-z0-9 _-][A-Za-z0-9 ._-]{0,8}", 1..5),
        ) {
            let (s, _dir) = storage();
            let raw = parts.join("/");
            let r = s.resolve(&raw).unwrap();
            prop_assert!(r.abs.starts_with(s.root()));
            prop_assert!(!r.rel.split('/').any(|seg| seg == ".."));
        }
    }
}
