//! フォルダ作成・リネーム・移動・削除。
//!
//! どの操作も名前とパスの検証をすべて済ませてからファイルシステムに触れる。
//! アプリケーションレベルのロックは持たない（同時操作の調停はファイルシステム任せ）。

use std::fs;

use super::{FsError, FsResult, Resolved, STAGING_DIR, Storage, join_rel};

/// Windows を含む一般的なファイルシステムで使えない文字
const ILLEGAL_NAME_CHARS: &[char] = &['<', '>', ':', '"', '|', '?', '*', '/', '\\'];

/// 単一セグメントの名前を検証し、前後の空白を除いた名前を返す
pub fn validate_name(raw: &str) -> FsResult<&str> {
    let name = raw.trim();
    if name.is_empty()
        || name == "."
        || name == ".."
        || name == STAGING_DIR
        || name
            .chars()
            .any(|c| ILLEGAL_NAME_CHARS.contains(&c) || c.is_control())
    {
        return Err(FsError::InvalidName);
    }
    Ok(name)
}

/// `parent/name` を作成（途中のディレクトリも作成、既存なら成功）
pub fn create_folder(storage: &Storage, parent: &str, name: &str) -> FsResult<String> {
    let name = validate_name(name)?;
    let parent = storage.resolve(parent)?;
    let target = storage.resolve(&join_rel(&parent.rel, name))?;

    if let Ok(metadata) = fs::metadata(&target.abs)
        && !metadata.is_dir()
    {
        return Err(FsError::NameConflict);
    }

    tracing::info!("storage: mkdir {}", target.abs.display());
    fs::create_dir_all(&target.abs)?;
    Ok(target.rel)
}

/// 同じ親ディレクトリ内で名前を変更する
pub fn rename(storage: &Storage, old_path: &str, new_name: &str) -> FsResult<String> {
    let new_name = validate_name(new_name)?;
    let old = storage.resolve(old_path)?;
    let parent = old
        .parent()
        .ok_or(FsError::Forbidden("Cannot rename root folder"))?;
    let sibling = storage.resolve(&join_rel(&parent.rel, new_name))?;

    fs::symlink_metadata(&old.abs)?;
    if sibling.rel == old.rel {
        return Ok(old.rel);
    }
    if occupied(&sibling, &old)? {
        return Err(FsError::NameConflict);
    }

    tracing::info!(
        "storage: rename {} -> {}",
        old.abs.display(),
        sibling.abs.display()
    );
    fs::rename(&old.abs, &sibling.abs)?;
    Ok(sibling.rel)
}

/// `source` を `destination` ディレクトリ直下へ移動する（同一ツリー内の rename）
pub fn move_entry(storage: &Storage, source: &str, destination: &str) -> FsResult<String> {
    let src = storage.resolve(source)?;
    let dest = storage.resolve(destination)?;

    if src.is_root() {
        return Err(FsError::Forbidden("Cannot move root folder"));
    }
    // 自分自身・自分の配下への移動は rename 呼び出し前に弾く
    if dest.is_within(&src) {
        return Err(FsError::SelfMove);
    }
    let target = storage.resolve(&join_rel(&dest.rel, src.name()))?;
    if target.rel == src.rel {
        return Err(FsError::SelfMove);
    }

    fs::symlink_metadata(&src.abs)?;
    if !fs::metadata(&dest.abs)?.is_dir() {
        return Err(FsError::NotADirectory);
    }
    // シンボリックリンクによる別名経由でも自分自身・自分の配下・現在の親は拒否
    let src_parent = src.abs.parent().ok_or(FsError::AccessDenied)?.canonicalize()?;
    let src_canonical = src_parent.join(src.name());
    let dest_canonical = dest.abs.canonicalize()?;
    if dest_canonical.starts_with(&src_canonical) || dest_canonical == src_parent {
        return Err(FsError::SelfMove);
    }
    if occupied(&target, &src)? {
        return Err(FsError::NameConflict);
    }

    tracing::info!(
        "storage: move {} -> {}",
        src.abs.display(),
        target.abs.display()
    );
    fs::rename(&src.abs, &target.abs)?;
    Ok(target.rel)
}

/// ファイルまたはディレクトリ（再帰）を削除する。失敗は握りつぶさない。
pub fn delete(storage: &Storage, path: &str) -> FsResult<()> {
    let target = storage.resolve(path)?;
    if target.is_root() {
        return Err(FsError::Forbidden("Cannot delete root folder"));
    }

    // リンクは辿らずリンク自体を消す
    let file_type = fs::symlink_metadata(&target.abs)?.file_type();

    tracing::info!("storage: delete {}", target.abs.display());
    if file_type.is_dir() {
        fs::remove_dir_all(&target.abs)?;
    } else if cfg!(windows) && file_type.is_symlink() && target.abs.is_dir() {
        fs::remove_dir(&target.abs)?;
    } else {
        fs::remove_file(&target.abs)?;
    }
    Ok(())
}

/// `target` に `source` 以外のエントリが既に存在するか。
/// 大文字小文字だけを変えるリネームは、大文字小文字を区別しない
/// ファイルシステム上で自分自身に当たるため、親の一覧で完全一致を確認する。
fn occupied(target: &Resolved, source: &Resolved) -> FsResult<bool> {
    if fs::symlink_metadata(&target.abs).is_err() {
        return Ok(false);
    }

    let case_only = target.name() != source.name()
        && target.name().to_lowercase() == source.name().to_lowercase()
        && target.parent() == source.parent();
    if !case_only {
        return Ok(true);
    }

    let parent = target.abs.parent().ok_or(FsError::AccessDenied)?;
    for entry in fs::read_dir(parent)? {
        if entry?.file_name() == target.name() {
            return Ok(true);
        }
    }
    Ok(false)
}
