//! Backup manager (spec §4.6).
//!
//! Backups are `tar` + `zstd` archives of a data directory, tracked as a
//! chain: one full backup followed by zero or more incrementals, each
//! covering only the files that changed since its parent (per-file LSN
//! tracking, grounded on `recovery/backup_manager.h`'s `FileChangeInfo`).
//! Restoring a backup means resolving the chain back to its full ancestor
//! and replaying each link's files forward, oldest first.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use kvdb_core::{Error, Result};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BackupType {
    Full,
    Incremental,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupMetadata {
    pub id: String,
    pub backup_type: BackupType,
    pub parent_id: Option<String>,
    pub created_ms: u64,
    pub start_lsn: u64,
    pub end_lsn: u64,
    pub files: Vec<String>,
    pub archive_crc32: u32,
    pub archive_size_bytes: u64,
}

#[derive(Debug, Clone)]
pub struct BackupResult {
    pub metadata: BackupMetadata,
    pub elapsed: std::time::Duration,
}

/// One backup's position in the chain of full + incremental ancestors.
#[derive(Debug, Clone)]
pub struct BackupChainInfo {
    pub full_backup_id: String,
    pub incremental_backup_ids: Vec<String>,
    pub is_complete: bool,
    pub total_size_bytes: u64,
}

/// Per-file change tracking used to decide what an incremental backup must
/// include, grounded on `backup_manager.h`'s `FileChangeInfo`.
#[derive(Debug, Clone, Copy)]
struct FileChangeInfo {
    last_modified_lsn: u64,
    size_bytes: u64,
    crc32: u32,
}

/// Tracks, per relative file path, the LSN at which it was last modified.
/// The engine calls [`FileLsnTracker::record`] as writes land; the backup
/// manager consults it to decide what an incremental backup must include.
#[derive(Default)]
pub struct FileLsnTracker {
    files: RwLock<BTreeMap<String, FileChangeInfo>>,
}

impl FileLsnTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, relative_path: impl Into<String>, lsn: u64, size_bytes: u64, crc32: u32) {
        self.files.write().insert(
            relative_path.into(),
            FileChangeInfo { last_modified_lsn: lsn, size_bytes, crc32 },
        );
    }

    /// Files whose tracked LSN is strictly greater than `since_lsn`.
    pub fn changed_since(&self, since_lsn: u64) -> Vec<String> {
        self.files
            .read()
            .iter()
            .filter(|(_, info)| info.last_modified_lsn > since_lsn)
            .map(|(path, _)| path.clone())
            .collect()
    }

    pub fn all_files(&self) -> Vec<String> {
        self.files.read().keys().cloned().collect()
    }
}

fn now_ms() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_millis() as u64).unwrap_or(0)
}

fn archive_path(backup_dir: &Path, id: &str) -> PathBuf {
    backup_dir.join(format!("{id}.tar.zst"))
}

fn metadata_path(backup_dir: &Path, id: &str) -> PathBuf {
    backup_dir.join(format!("{id}.meta.json"))
}

/// Owns a backup directory (one archive + one metadata file per backup).
pub struct BackupManager {
    dir: PathBuf,
    compression_level: i32,
}

impl BackupManager {
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        Ok(BackupManager { dir, compression_level: 3 })
    }

    pub fn set_compression_level(&mut self, level: i32) {
        self.compression_level = level;
    }

    /// Archives every file under `data_dir` relative to it.
    pub fn create_full(&self, id: impl Into<String>, data_dir: &Path, end_lsn: u64, tracker: &FileLsnTracker) -> Result<BackupResult> {
        let start = std::time::Instant::now();
        let id = id.into();
        let files = tracker.all_files();
        let metadata = self.write_archive(&id, None, BackupType::Full, data_dir, &files, 0, end_lsn)?;
        tracing::info!(backup_id = %metadata.id, files = metadata.files.len(), "full backup created");
        Ok(BackupResult { metadata, elapsed: start.elapsed() })
    }

    /// Archives only the files `tracker` reports changed since `parent`'s
    /// `end_lsn`.
    pub fn create_incremental(
        &self,
        id: impl Into<String>,
        data_dir: &Path,
        parent: &BackupMetadata,
        end_lsn: u64,
        tracker: &FileLsnTracker,
    ) -> Result<BackupResult> {
        let start = std::time::Instant::now();
        let id = id.into();
        let files = tracker.changed_since(parent.end_lsn);
        let metadata = self.write_archive(
            &id,
            Some(parent.id.clone()),
            BackupType::Incremental,
            data_dir,
            &files,
            parent.end_lsn,
            end_lsn,
        )?;
        tracing::info!(backup_id = %metadata.id, parent = %parent.id, files = metadata.files.len(), "incremental backup created");
        Ok(BackupResult { metadata, elapsed: start.elapsed() })
    }

    fn write_archive(
        &self,
        id: &str,
        parent_id: Option<String>,
        backup_type: BackupType,
        data_dir: &Path,
        files: &[String],
        start_lsn: u64,
        end_lsn: u64,
    ) -> Result<BackupMetadata> {
        let archive_file = File::create(archive_path(&self.dir, id))?;
        let encoder = zstd::Encoder::new(archive_file, self.compression_level)?;
        let mut tar_builder = tar::Builder::new(encoder);

        for rel in files {
            let full = data_dir.join(rel);
            if full.is_file() {
                tar_builder.append_path_with_name(&full, rel)?;
            }
        }
        let encoder = tar_builder.into_inner()?;
        encoder.finish()?;

        let archive_bytes = fs::read(archive_path(&self.dir, id))?;
        let metadata = BackupMetadata {
            id: id.to_string(),
            backup_type,
            parent_id,
            created_ms: now_ms(),
            start_lsn,
            end_lsn,
            files: files.to_vec(),
            archive_crc32: kvdb_core::crc32(&archive_bytes),
            archive_size_bytes: archive_bytes.len() as u64,
        };

        let json = serde_json::to_vec_pretty(&metadata)?;
        fs::write(metadata_path(&self.dir, id), json)?;
        Ok(metadata)
    }

    pub fn get_backup_info(&self, id: &str) -> Result<BackupMetadata> {
        let bytes = fs::read(metadata_path(&self.dir, id))
            .map_err(|_| Error::BackupChainBroken(format!("backup {id} not found")))?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    pub fn list_backups(&self) -> Result<Vec<BackupMetadata>> {
        let mut out = Vec::new();
        if !self.dir.exists() {
            return Ok(out);
        }
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if let Some(id) = name.strip_suffix(".meta.json") {
                out.push(self.get_backup_info(id)?);
            }
        }
        out.sort_by_key(|m| m.created_ms);
        Ok(out)
    }

    /// Walks a backup's `parent_id` chain back to its full ancestor.
    pub fn analyze_backup_chain(&self, leaf_id: &str) -> Result<BackupChainInfo> {
        let mut current = self.get_backup_info(leaf_id)?;
        let mut incrementals = Vec::new();
        if current.backup_type == BackupType::Incremental {
            incrementals.push(current.id.clone());
        }
        let mut total_size = current.archive_size_bytes;

        let mut is_complete = true;
        while let Some(parent_id) = current.parent_id.clone() {
            let parent = match self.get_backup_info(&parent_id) {
                Ok(p) => p,
                Err(_) => {
                    is_complete = false;
                    break;
                }
            };
            total_size += parent.archive_size_bytes;
            if parent.backup_type == BackupType::Incremental {
                incrementals.push(parent.id.clone());
            }
            current = parent;
        }
        incrementals.reverse();

        Ok(BackupChainInfo {
            full_backup_id: current.id,
            incremental_backup_ids: incrementals,
            is_complete,
            total_size_bytes: total_size,
        })
    }

    /// Restores `leaf_id`'s full chain (full backup, then each incremental
    /// in order) into `target_dir`.
    pub fn restore_from_backup_chain(&self, leaf_id: &str, target_dir: &Path) -> Result<()> {
        let chain = self.analyze_backup_chain(leaf_id)?;
        if !chain.is_complete {
            return Err(Error::BackupChainBroken(format!(
                "chain for {leaf_id} is missing an ancestor backup"
            )));
        }
        fs::create_dir_all(target_dir)?;
        self.extract_archive(&chain.full_backup_id, target_dir)?;
        for id in &chain.incremental_backup_ids {
            self.extract_archive(id, target_dir)?;
        }
        tracing::info!(leaf = %leaf_id, links = chain.incremental_backup_ids.len() + 1, "backup chain restored");
        Ok(())
    }

    /// Restores a single backup (ignoring any chain) into `target_dir`.
    pub fn restore_from_backup(&self, id: &str, target_dir: &Path) -> Result<()> {
        fs::create_dir_all(target_dir)?;
        self.extract_archive(id, target_dir)
    }

    fn extract_archive(&self, id: &str, target_dir: &Path) -> Result<()> {
        self.validate(id)?;
        let file = File::open(archive_path(&self.dir, id))?;
        let decoder = zstd::Decoder::new(file)?;
        let mut archive = tar::Archive::new(decoder);
        archive.unpack(target_dir)?;
        Ok(())
    }

    /// Verifies the archive bytes against the recorded CRC without
    /// extracting it.
    pub fn validate(&self, id: &str) -> Result<()> {
        let info = self.get_backup_info(id)?;
        let bytes = fs::read(archive_path(&self.dir, id))
            .map_err(|_| Error::BackupChainBroken(format!("backup {id} archive missing")))?;
        let actual = kvdb_core::crc32(&bytes);
        if actual != info.archive_crc32 {
            return Err(Error::BackupChainBroken(format!(
                "backup {id}: archive crc mismatch (expected {:#x}, got {actual:#x})",
                info.archive_crc32
            )));
        }
        Ok(())
    }

    /// Backups whose archive fails CRC validation.
    pub fn find_corrupted_backups(&self) -> Result<Vec<String>> {
        let mut out = Vec::new();
        for info in self.list_backups()? {
            if self.validate(&info.id).is_err() {
                out.push(info.id);
            }
        }
        Ok(out)
    }

    pub fn delete_backup(&self, id: &str) -> Result<()> {
        let _ = fs::remove_file(archive_path(&self.dir, id));
        let _ = fs::remove_file(metadata_path(&self.dir, id));
        Ok(())
    }

    /// Deletes full backups (and everything that chains from them) older
    /// than `keep_newest` full generations.
    pub fn cleanup_old(&self, keep_newest: usize) -> Result<usize> {
        let all = self.list_backups()?;
        let mut fulls: Vec<&BackupMetadata> = all.iter().filter(|m| m.backup_type == BackupType::Full).collect();
        fulls.sort_by_key(|m| m.created_ms);
        if fulls.len() <= keep_newest {
            return Ok(0);
        }
        let to_drop = fulls.len() - keep_newest;
        let drop_ids: Vec<String> = fulls.iter().take(to_drop).map(|m| m.id.clone()).collect();
        let mut removed = 0;
        for m in &all {
            let chains_from_dropped = match &m.parent_id {
                Some(p) => drop_ids.contains(p) || drop_ids.contains(&m.id),
                None => drop_ids.contains(&m.id),
            };
            if chains_from_dropped {
                self.delete_backup(&m.id)?;
                removed += 1;
            }
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn write_file(dir: &Path, rel: &str, content: &[u8]) {
        let path = dir.join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        let mut f = File::create(path).unwrap();
        f.write_all(content).unwrap();
    }

    #[test]
    fn full_backup_round_trips_all_files() {
        let data_dir = tempdir().unwrap();
        let backup_dir = tempdir().unwrap();
        let restore_dir = tempdir().unwrap();

        write_file(data_dir.path(), "a.dat", b"hello");
        write_file(data_dir.path(), "b.dat", b"world");

        let tracker = FileLsnTracker::new();
        tracker.record("a.dat", 1, 5, 0);
        tracker.record("b.dat", 2, 5, 0);

        let mgr = BackupManager::open(backup_dir.path()).unwrap();
        let result = mgr.create_full("b1", data_dir.path(), 2, &tracker).unwrap();
        assert_eq!(result.metadata.files.len(), 2);

        mgr.restore_from_backup("b1", restore_dir.path()).unwrap();
        assert_eq!(fs::read(restore_dir.path().join("a.dat")).unwrap(), b"hello");
        assert_eq!(fs::read(restore_dir.path().join("b.dat")).unwrap(), b"world");
    }

    #[test]
    fn incremental_backup_only_includes_changed_files() {
        let data_dir = tempdir().unwrap();
        let backup_dir = tempdir().unwrap();

        write_file(data_dir.path(), "a.dat", b"v1");
        write_file(data_dir.path(), "b.dat", b"v1");

        let tracker = FileLsnTracker::new();
        tracker.record("a.dat", 1, 2, 0);
        tracker.record("b.dat", 2, 2, 0);

        let mgr = BackupManager::open(backup_dir.path()).unwrap();
        let full = mgr.create_full("b1", data_dir.path(), 2, &tracker).unwrap().metadata;

        write_file(data_dir.path(), "a.dat", b"v2-changed");
        tracker.record("a.dat", 3, 10, 0);

        let inc = mgr
            .create_incremental("b2", data_dir.path(), &full, 3, &tracker)
            .unwrap()
            .metadata;
        assert_eq!(inc.files, vec!["a.dat".to_string()]);
    }

    #[test]
    fn chain_restore_applies_full_then_incrementals() {
        let data_dir = tempdir().unwrap();
        let backup_dir = tempdir().unwrap();
        let restore_dir = tempdir().unwrap();

        write_file(data_dir.path(), "a.dat", b"v1");
        write_file(data_dir.path(), "b.dat", b"v1");
        let tracker = FileLsnTracker::new();
        tracker.record("a.dat", 1, 2, 0);
        tracker.record("b.dat", 1, 2, 0);

        let mgr = BackupManager::open(backup_dir.path()).unwrap();
        let full = mgr.create_full("b1", data_dir.path(), 1, &tracker).unwrap().metadata;

        write_file(data_dir.path(), "a.dat", b"v2");
        tracker.record("a.dat", 2, 2, 0);
        mgr.create_incremental("b2", data_dir.path(), &full, 2, &tracker).unwrap();

        mgr.restore_from_backup_chain("b2", restore_dir.path()).unwrap();
        assert_eq!(fs::read(restore_dir.path().join("a.dat")).unwrap(), b"v2");
        assert_eq!(fs::read(restore_dir.path().join("b.dat")).unwrap(), b"v1");
    }

    #[test]
    fn chain_analysis_reports_broken_chain() {
        let backup_dir = tempdir().unwrap();
        let data_dir = tempdir().unwrap();
        write_file(data_dir.path(), "a.dat", b"v1");
        let tracker = FileLsnTracker::new();
        tracker.record("a.dat", 1, 2, 0);

        let mgr = BackupManager::open(backup_dir.path()).unwrap();
        let full = mgr.create_full("b1", data_dir.path(), 1, &tracker).unwrap().metadata;
        mgr.create_incremental("b2", data_dir.path(), &full, 2, &tracker).unwrap();

        mgr.delete_backup("b1").unwrap();
        let chain = mgr.analyze_backup_chain("b2").unwrap();
        assert!(!chain.is_complete);
    }

    #[test]
    fn validate_detects_tampered_archive() {
        let backup_dir = tempdir().unwrap();
        let data_dir = tempdir().unwrap();
        write_file(data_dir.path(), "a.dat", b"v1");
        let tracker = FileLsnTracker::new();
        tracker.record("a.dat", 1, 2, 0);

        let mgr = BackupManager::open(backup_dir.path()).unwrap();
        let meta = mgr.create_full("b1", data_dir.path(), 1, &tracker).unwrap().metadata;
        fs::write(archive_path(backup_dir.path(), &meta.id), b"tampered bytes").unwrap();
        assert!(mgr.validate("b1").is_err());
    }

    #[test]
    fn tracker_reports_only_files_past_lsn() {
        let tracker = FileLsnTracker::new();
        tracker.record("a.dat", 1, 1, 0);
        tracker.record("b.dat", 5, 1, 0);
        let changed = tracker.changed_since(2);
        assert_eq!(changed, vec!["b.dat".to_string()]);
    }
}
