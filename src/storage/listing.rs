use serde::Serialize;
use std::cmp::Ordering;
use std::fs;
use std::path::Path;

use super::{FsError, FsResult, Resolved, STAGING_DIR, join_rel};

/// ツリー再帰の上限
const MAX_TREE_DEPTH: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    Folder,
    File,
}

#[derive(Debug, Serialize)]
pub struct Entry {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: EntryKind,
    /// ファイルのみ
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    pub modified: Option<String>,
    pub path: String,
}

impl Entry {
    pub fn is_dir(&self) -> bool {
        self.kind == EntryKind::Folder
    }
}

#[derive(Debug, Serialize)]
pub struct TreeNode {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: EntryKind,
    pub path: String,
    pub children: Vec<TreeNode>,
}

/// 名前順（大文字小文字を無視し、同順位は小文字を先に）
pub fn compare_names(a: &str, b: &str) -> Ordering {
    a.to_lowercase()
        .cmp(&b.to_lowercase())
        .then_with(|| swap_case(a).cmp(&swap_case(b)))
}

fn swap_case(s: &str) -> String {
    s.chars()
        .map(|c| {
            if c.is_lowercase() {
                c.to_uppercase().next().unwrap_or(c)
            } else {
                c.to_lowercase().next().unwrap_or(c)
            }
        })
        .collect()
}

/// ディレクトリ直下を一覧する。消えた／stat できない子はスキップ。
pub fn list(dir: &Resolved) -> FsResult<Vec<Entry>> {
    let metadata = fs::metadata(&dir.abs)?;
    if !metadata.is_dir() {
        return Err(FsError::NotADirectory);
    }

    let mut entries = Vec::new();
    for entry_result in fs::read_dir(&dir.abs)? {
        let entry = match entry_result {
            Ok(e) => e,
            Err(e) => {
                tracing::debug!("storage: list entry error in {}: {e}", dir.abs.display());
                continue;
            }
        };
        let name = entry.file_name().to_string_lossy().into_owned();
        if dir.is_root() && name == STAGING_DIR {
            continue;
        }

        // シンボリックリンクは参照先の種別で表示する
        let metadata = match fs::metadata(entry.path()) {
            Ok(m) => m,
            Err(e) => {
                tracing::debug!("storage: metadata error for {}: {e}", entry.path().display());
                continue;
            }
        };

        let modified = metadata.modified().ok().map(|t| {
            let dt: chrono::DateTime<chrono::Utc> = t.into();
            dt.to_rfc3339()
        });
        let (kind, size) = if metadata.is_dir() {
            (EntryKind::Folder, None)
        } else {
            (EntryKind::File, Some(metadata.len()))
        };

        entries.push(Entry {
            path: join_rel(&dir.rel, &name),
            name,
            kind,
            size,
            modified,
        });
    }

    entries.sort_by(|a, b| {
        b.is_dir()
            .cmp(&a.is_dir())
            .then_with(|| compare_names(&a.name, &b.name))
    });
    Ok(entries)
}

/// フォルダのみを再帰的に辿ってツリーを構築する
pub fn build_tree(dir: &Resolved) -> FsResult<Vec<TreeNode>> {
    let metadata = fs::metadata(&dir.abs)?;
    if !metadata.is_dir() {
        return Err(FsError::NotADirectory);
    }
    tree_level(&dir.abs, &dir.rel, 0)
}

fn tree_level(dir: &Path, rel: &str, depth: usize) -> FsResult<Vec<TreeNode>> {
    let mut nodes = Vec::new();
    if depth >= MAX_TREE_DEPTH {
        tracing::warn!("storage: tree depth limit reached at {}", dir.display());
        return Ok(nodes);
    }

    for entry_result in fs::read_dir(dir)? {
        let entry = match entry_result {
            Ok(e) => e,
            Err(e) => {
                tracing::debug!("storage: tree entry error in {}: {e}", dir.display());
                continue;
            }
        };
        // file_type() はリンクを辿らない → リンク先ディレクトリへは降りない
        match entry.file_type() {
            Ok(ft) if ft.is_dir() => {}
            _ => continue,
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        if rel.is_empty() && name == STAGING_DIR {
            continue;
        }

        let path = join_rel(rel, &name);
        let children = match tree_level(&entry.path(), &path, depth + 1) {
            Ok(children) => children,
            Err(e) => {
                tracing::debug!("storage: tree skip children of {path}: {e}");
                Vec::new()
            }
        };
        nodes.push(TreeNode {
            name,
            kind: EntryKind::Folder,
            path,
            children,
        });
    }

    nodes.sort_by(|a, b| compare_names(&a.name, &b.name));
    Ok(nodes)
}
