//! Backup store (C10): content-addressed, per-operation snapshots of
//! every file the applicator is about to rewrite, so a failed write or a
//! failed post-validation can always be rolled back.
//!
//! Layout under `<project_root>/.dedup-backups/`:
//! - `blobs/<sha256>` — one copy of each distinct file content ever backed
//!   up, shared across backups when two operations touch the same bytes.
//! - `<backup_id>/manifest.json` — the [`BackupHandle`] for that operation.

use std::path::{Path, PathBuf};

use chrono::Utc;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::errors::{DedupError, Result};
use crate::model::{BackedUpFile, BackupHandle};

const BACKUP_DIR_NAME: &str = ".dedup-backups";
const BLOBS_DIR_NAME: &str = "blobs";
const MANIFEST_FILE_NAME: &str = "manifest.json";

/// Owns the on-disk backup tree for one project root. All methods are
/// blocking; callers on an async runtime should run them via
/// `tokio::task::spawn_blocking`.
pub struct BackupStore {
    project_root: PathBuf,
}

impl BackupStore {
    pub fn new(project_root: impl Into<PathBuf>) -> Self {
        Self {
            project_root: project_root.into(),
        }
    }

    fn backups_root(&self) -> PathBuf {
        self.project_root.join(BACKUP_DIR_NAME)
    }

    fn blobs_dir(&self) -> PathBuf {
        self.backups_root().join(BLOBS_DIR_NAME)
    }

    fn blob_path(&self, sha256_hex: &str) -> PathBuf {
        self.blobs_dir().join(sha256_hex)
    }

    fn manifest_path(&self, backup_id: &str) -> PathBuf {
        self.backups_root().join(backup_id).join(MANIFEST_FILE_NAME)
    }

    /// Snapshot every file in `files` (which must already exist) into the
    /// content-addressed blob store, then write a manifest tying them
    /// together under a fresh backup id.
    pub fn create_backup(&self, files: &[PathBuf]) -> Result<BackupHandle> {
        std::fs::create_dir_all(self.blobs_dir())
            .map_err(|e| DedupError::io("failed to create backup blob directory", e))?;

        let mut backed_up = Vec::with_capacity(files.len());
        for path in files {
            let content = std::fs::read(path)
                .map_err(|e| DedupError::io(format!("failed to read {} for backup", path.display()), e))?;
            let sha256_hex = hex_digest(&content);
            let blob_path = self.blob_path(&sha256_hex);
            if !blob_path.exists() {
                atomic_write(&blob_path, &content)?;
            }
            backed_up.push(BackedUpFile {
                path: path.clone(),
                original_sha256: sha256_hex.clone(),
                blob_ref: sha256_hex,
            });
        }

        let backup_id = Uuid::new_v4().to_string();
        let handle = BackupHandle {
            backup_id: backup_id.clone(),
            created_at: Utc::now(),
            project_root: self.project_root.clone(),
            files: backed_up,
            metadata: Default::default(),
        };

        let manifest_path = self.manifest_path(&backup_id);
        if let Some(parent) = manifest_path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| DedupError::io("failed to create backup manifest directory", e))?;
        }
        let manifest_json = serde_json::to_vec_pretty(&handle)?;
        atomic_write(&manifest_path, &manifest_json)?;

        Ok(handle)
    }

    /// Restore every file named in `handle` from its blob. Idempotent:
    /// restoring the same handle twice is a no-op the second time, since
    /// the blob content never changes.
    pub fn restore(&self, handle: &BackupHandle) -> Result<()> {
        for file in &handle.files {
            let blob_path = self.blob_path(&file.blob_ref);
            let content = std::fs::read(&blob_path).map_err(|e| {
                DedupError::io(format!("backup blob missing for {}", file.path.display()), e)
            })?;
            if let Some(parent) = file.path.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| DedupError::io("failed to recreate parent directory on restore", e))?;
            }
            atomic_write(&file.path, &content)?;
        }
        Ok(())
    }

    /// Load a previously written manifest by id.
    pub fn load_manifest(&self, backup_id: &str) -> Result<BackupHandle> {
        let path = self.manifest_path(backup_id);
        let content = std::fs::read(&path)
            .map_err(|e| DedupError::io(format!("failed to read manifest for {backup_id}"), e))?;
        Ok(serde_json::from_slice(&content)?)
    }

    /// Delete every backup (manifest + any blobs no longer referenced by a
    /// remaining manifest) older than `retention_days`. Returns the
    /// removed backup ids.
    pub fn purge(&self, retention_days: u64) -> Result<Vec<String>> {
        let backups_root = self.backups_root();
        if !backups_root.exists() {
            return Ok(Vec::new());
        }
        let cutoff = Utc::now() - chrono::Duration::days(retention_days as i64);

        let mut removed = Vec::new();
        let mut live_blob_refs = std::collections::HashSet::new();

        let entries = std::fs::read_dir(&backups_root)
            .map_err(|e| DedupError::io("failed to list backup directory", e))?;
        let mut manifests = Vec::new();
        for entry in entries.flatten() {
            if !entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
                continue;
            }
            let backup_id = entry.file_name().to_string_lossy().into_owned();
            if let Ok(manifest) = self.load_manifest(&backup_id) {
                manifests.push((backup_id, manifest));
            }
        }

        for (backup_id, manifest) in manifests {
            if manifest.created_at < cutoff {
                let dir = backups_root.join(&backup_id);
                std::fs::remove_dir_all(&dir)
                    .map_err(|e| DedupError::io(format!("failed to remove backup {backup_id}"), e))?;
                removed.push(backup_id);
            } else {
                for file in &manifest.files {
                    live_blob_refs.insert(file.blob_ref.clone());
                }
            }
        }

        if let Ok(entries) = std::fs::read_dir(self.blobs_dir()) {
            for entry in entries.flatten() {
                let name = entry.file_name().to_string_lossy().into_owned();
                if !live_blob_refs.contains(&name) {
                    let _ = std::fs::remove_file(entry.path());
                }
            }
        }

        Ok(removed)
    }
}

fn hex_digest(content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content);
    format!("{:x}", hasher.finalize())
}

/// Write via a temp file in the same directory, then rename, so a crash
/// mid-write never leaves a half-written blob or manifest behind.
fn atomic_write(path: &Path, content: &[u8]) -> Result<()> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    let tmp_path = parent.join(format!(".tmp-{}", Uuid::new_v4()));
    std::fs::write(&tmp_path, content)
        .map_err(|e| DedupError::io(format!("failed writing temp file for {}", path.display()), e))?;
    std::fs::rename(&tmp_path, path)
        .map_err(|e| DedupError::io(format!("failed renaming temp file into {}", path.display()), e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backup_then_restore_round_trips_content() {
        let tmp = tempfile::tempdir().unwrap();
        let file = tmp.path().join("a.py");
        std::fs::write(&file, "original").unwrap();

        let store = BackupStore::new(tmp.path());
        let handle = store.create_backup(&[file.clone()]).unwrap();

        std::fs::write(&file, "mutated").unwrap();
        store.restore(&handle).unwrap();

        assert_eq!(std::fs::read_to_string(&file).unwrap(), "original");
    }

    #[test]
    fn purge_removes_only_expired_backups() {
        let tmp = tempfile::tempdir().unwrap();
        let file = tmp.path().join("a.py");
        std::fs::write(&file, "content").unwrap();

        let store = BackupStore::new(tmp.path());
        let handle = store.create_backup(&[file.clone()]).unwrap();

        let removed = store.purge(30).unwrap();
        assert!(removed.is_empty());
        assert!(store.load_manifest(&handle.backup_id).is_ok());
    }

    #[test]
    fn identical_content_shares_one_blob() {
        let tmp = tempfile::tempdir().unwrap();
        let a = tmp.path().join("a.py");
        let b = tmp.path().join("b.py");
        std::fs::write(&a, "same").unwrap();
        std::fs::write(&b, "same").unwrap();

        let store = BackupStore::new(tmp.path());
        let handle = store.create_backup(&[a, b]).unwrap();
        assert_eq!(handle.files[0].blob_ref, handle.files[1].blob_ref);

        let blob_count = std::fs::read_dir(store.blobs_dir()).unwrap().count();
        assert_eq!(blob_count, 1);
    }
}
