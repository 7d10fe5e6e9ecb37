//! アップロードの取り込み。
//!
//! 受信中のファイルはルート直下の一時領域（`.upload_temp/<uuid>/`）に書き出し、
//! 全件の受信と検証が終わってから配置先へ rename する。途中で失敗したバッチは
//! ツリーに何も残さない。

use serde::Serialize;
use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use super::ops::validate_name;
use super::{FsError, FsResult, Resolved, Storage, join_rel};

/// 1 リクエストあたりのファイル数上限（既定値）
pub const DEFAULT_MAX_FILES: usize = 50;
/// 1 ファイルあたりのサイズ上限（既定値）: 5GiB
pub const DEFAULT_MAX_FILE_SIZE: u64 = 5 * 1024 * 1024 * 1024;

#[derive(Debug, Clone, Copy)]
pub struct UploadLimits {
    pub max_files: usize,
    pub max_file_size: u64,
}

impl Default for UploadLimits {
    fn default() -> Self {
        Self {
            max_files: DEFAULT_MAX_FILES,
            max_file_size: DEFAULT_MAX_FILE_SIZE,
        }
    }
}

impl UploadLimits {
    pub fn check_count(&self, count: usize) -> FsResult<()> {
        if count > self.max_files {
            return Err(FsError::TooManyFiles(self.max_files));
        }
        Ok(())
    }

    pub fn check_size(&self, size: u64) -> FsResult<()> {
        if size > self.max_file_size {
            return Err(FsError::FileTooLarge(self.max_file_size));
        }
        Ok(())
    }
}

/// リクエスト単位の一時領域。drop 時に中身ごと削除する。
pub struct Staging {
    dir: PathBuf,
}

impl Staging {
    pub fn create(storage: &Storage) -> io::Result<Self> {
        let dir = storage
            .staging_dir()
            .join(uuid::Uuid::new_v4().to_string());
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn part_path(&self, index: usize) -> PathBuf {
        self.dir.join(format!("{}.part", index))
    }

    /// 上書きされる既存ファイルの退避先
    pub fn backup_path(&self, index: usize) -> PathBuf {
        self.dir.join(format!("{}.orig", index))
    }
}

impl Drop for Staging {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_dir_all(&self.dir)
            && e.kind() != io::ErrorKind::NotFound
        {
            tracing::warn!("upload: staging cleanup failed {}: {e}", self.dir.display());
        }
    }
}

/// 一時領域に受信済みの 1 ファイル
#[derive(Debug)]
pub struct IncomingFile {
    /// クライアントが送ったファイル名（未検証）
    pub file_name: String,
    /// フォルダアップロード時の相対パス（ファイル名を含む）
    pub relative_path: Option<String>,
    pub staged: PathBuf,
    pub size: u64,
}

#[derive(Debug, Serialize)]
pub struct UploadedFile {
    pub name: String,
    pub size: u64,
    pub path: String,
}

/// 受信済みファイルを `target` 配下に配置する。
///
/// すべての配置先を先に検証し、1 件でも不正なら何も書き込まない。
/// 配置中に失敗した場合は、このバッチで行った変更（配置したファイル、作成したフォルダ、
/// 上書きのために退避した既存ファイル）を逆順に取り消してからエラーを返す。
pub fn ingest(
    storage: &Storage,
    limits: &UploadLimits,
    staging: &Staging,
    target: &str,
    files: Vec<IncomingFile>,
) -> FsResult<Vec<UploadedFile>> {
    limits.check_count(files.len())?;
    for file in &files {
        limits.check_size(file.size)?;
    }

    let target = storage.resolve(target)?;
    if let Ok(metadata) = fs::metadata(&target.abs)
        && !metadata.is_dir()
    {
        return Err(FsError::NotADirectory);
    }

    let planned = files
        .into_iter()
        .map(|file| {
            let dest = plan_destination(
                storage,
                &target,
                &file.file_name,
                file.relative_path.as_deref(),
            )?;
            Ok((file, dest))
        })
        .collect::<FsResult<Vec<_>>>()?;
    check_batch_layout(planned.iter().map(|(_, dest)| dest))?;

    let mut changes: Vec<Change> = Vec::new();
    let mut uploaded = Vec::with_capacity(planned.len());
    for (index, (file, dest)) in planned.into_iter().enumerate() {
        if let Err(e) = place(staging, index, &file.staged, &dest, &mut changes) {
            tracing::error!("upload: placing {} failed: {e}", dest.abs.display());
            roll_back(changes);
            return Err(e);
        }
        tracing::info!("upload: {} ({} bytes)", dest.abs.display(), file.size);
        uploaded.push(UploadedFile {
            name: dest.name().to_string(),
            size: file.size,
            path: dest.rel,
        });
    }
    Ok(uploaded)
}

/// 1 ファイル分の配置先を決める。
///
/// 既存ディレクトリと同名になる場合や、途中のセグメントが既存ファイルの場合は
/// `NameConflict`（ここでは読み取りのみ、書き込みはしない）。
pub fn plan_destination(
    storage: &Storage,
    target: &Resolved,
    file_name: &str,
    relative_path: Option<&str>,
) -> FsResult<Resolved> {
    let rel = match relative_path.filter(|p| !p.trim().is_empty()) {
        Some(relative) => {
            let mut rel = target.rel.clone();
            for segment in relative.split(['/', '\\']).filter(|s| !s.is_empty()) {
                rel = join_rel(&rel, validate_name(segment)?);
            }
            rel
        }
        None => {
            // パストラバーサル防止: ベースネームのみ使用
            let base = file_name.rsplit(['/', '\\']).next().unwrap_or_default();
            join_rel(&target.rel, validate_name(base)?)
        }
    };
    let dest = storage.resolve(&rel)?;

    if dest.abs.is_dir() {
        return Err(FsError::NameConflict);
    }
    for ancestor in dest
        .abs
        .ancestors()
        .skip(1)
        .take_while(|a| a.starts_with(storage.root()))
    {
        if let Ok(metadata) = fs::metadata(ancestor)
            && !metadata.is_dir()
        {
            return Err(FsError::NameConflict);
        }
    }
    Ok(dest)
}

/// 同じバッチ内でファイルとフォルダの名前がぶつからないこと
/// （`a` をファイルとして置きつつ `a/b.txt` も置く、など）
fn check_batch_layout<'a>(dests: impl Iterator<Item = &'a Resolved> + Clone) -> FsResult<()> {
    let files: HashSet<&str> = dests.clone().map(|d| d.rel.as_str()).collect();
    for dest in dests {
        let mut rel = dest.rel.as_str();
        while let Some((parent, _)) = rel.rsplit_once('/') {
            if files.contains(parent) {
                return Err(FsError::NameConflict);
            }
            rel = parent;
        }
    }
    Ok(())
}

/// 配置中に行った変更。失敗時は記録の逆順で取り消す。
#[derive(Debug)]
enum Change {
    CreatedDir(PathBuf),
    /// 上書き前の既存ファイルを一時領域へ退避した
    BackedUp { original: PathBuf, backup: PathBuf },
    Placed(PathBuf),
}

fn place(
    staging: &Staging,
    index: usize,
    staged: &Path,
    dest: &Resolved,
    changes: &mut Vec<Change>,
) -> FsResult<()> {
    if let Some(parent) = dest.abs.parent() {
        create_parents(parent, changes)?;
    }
    if dest.abs.is_dir() {
        return Err(FsError::NameConflict);
    }

    match fs::symlink_metadata(&dest.abs) {
        Ok(_) => {
            let backup = staging.backup_path(index);
            fs::rename(&dest.abs, &backup)?;
            changes.push(Change::BackedUp {
                original: dest.abs.clone(),
                backup,
            });
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }

    fs::rename(staged, &dest.abs)?;
    changes.push(Change::Placed(dest.abs.clone()));
    Ok(())
}

/// 存在しない祖先ディレクトリを浅い順に 1 つずつ作成し、作成したものを記録する
fn create_parents(dir: &Path, changes: &mut Vec<Change>) -> FsResult<()> {
    let missing: Vec<&Path> = dir
        .ancestors()
        .take_while(|a| fs::symlink_metadata(a).is_err())
        .collect();
    for path in missing.into_iter().rev() {
        fs::create_dir(path)?;
        changes.push(Change::CreatedDir(path.to_path_buf()));
    }
    Ok(())
}

fn roll_back(changes: Vec<Change>) {
    for change in changes.into_iter().rev() {
        let (result, path) = match &change {
            Change::Placed(path) => (fs::remove_file(path), path),
            Change::BackedUp { original, backup } => (fs::rename(backup, original), original),
            Change::CreatedDir(path) => (fs::remove_dir(path), path),
        };
        if let Err(e) = result {
            tracing::warn!("upload: rollback failed for {}: {e}", path.display());
        }
    }
}
