use crate::archive::{dir_size, read_descriptor_from_archive};
use crate::constants::backup;
use crate::error::{BackupError, Result};
use crate::metadata::{
    BackupArtifact, BackupDescriptor, BackupMetadata, compare_backup_ids, is_backup_id,
};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{debug, info, warn};

/// 备份目录的只读视图
///
/// 备份集合完全由文件系统列举得出，没有额外的索引文件。
#[derive(Debug, Clone)]
pub struct BackupCatalog {
    root: PathBuf,
}

impl BackupCatalog {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// 确保备份目录存在
    pub fn ensure_root(&self) -> Result<()> {
        fs::create_dir_all(&self.root).map_err(|e| BackupError::storage(&self.root, e))
    }

    /// 该ID是否已被任一格式占用
    pub fn exists(&self, id: &str) -> bool {
        self.root.join(id).exists()
            || self
                .root
                .join(format!("{id}{}", backup::ARCHIVE_EXTENSION))
                .exists()
    }

    /// 列出所有备份，同一ID只出现一次（归档格式优先）
    pub fn artifacts(&self) -> Result<Vec<BackupArtifact>> {
        if !self.root.exists() {
            return Ok(Vec::new());
        }

        let entries = fs::read_dir(&self.root).map_err(|e| BackupError::storage(&self.root, e))?;
        let mut by_id: HashMap<String, BackupArtifact> = HashMap::new();

        for entry in entries {
            let entry = entry.map_err(|e| BackupError::storage(&self.root, e))?;
            let Some(artifact) = classify(&entry.path()) else {
                continue;
            };

            match by_id.get(artifact.id()) {
                Some(BackupArtifact::Archive { .. }) => {
                    debug!("ID {} 同时存在两种格式，使用归档格式", artifact.id());
                }
                _ => {
                    by_id.insert(artifact.id().to_string(), artifact);
                }
            }
        }

        Ok(by_id.into_values().collect())
    }

    /// 列出所有备份的信息，按创建时间从新到旧
    pub fn list(&self) -> Result<Vec<BackupMetadata>> {
        let mut backups = self
            .artifacts()?
            .iter()
            .map(|artifact| self.describe(artifact))
            .collect::<Result<Vec<_>>>()?;

        backups.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| compare_backup_ids(&b.id, &a.id))
        });

        Ok(backups)
    }

    /// 计算单个备份的大小和创建时间
    pub fn describe(&self, artifact: &BackupArtifact) -> Result<BackupMetadata> {
        let descriptor = load_descriptor(artifact);

        let fs_metadata = fs::metadata(artifact.path())?;
        let file_size = match artifact {
            BackupArtifact::Archive { .. } => fs_metadata.len(),
            BackupArtifact::DirectorySnapshot { path, .. } => dir_size(path),
        };

        let created_at = match &descriptor {
            Some(descriptor) => descriptor.created_at,
            None => {
                let time = fs_metadata
                    .created()
                    .or_else(|_| fs_metadata.modified())
                    .unwrap_or(SystemTime::UNIX_EPOCH);
                DateTime::<Utc>::from(time)
            }
        };

        BackupMetadata::from_artifact(artifact, file_size, created_at, descriptor.as_ref())
    }

    /// 按ID定位备份
    ///
    /// 依次尝试：原样ID、ID加扩展名、补上 `backup-` 前缀、前缀加扩展名。
    pub fn get_path(&self, id: &str) -> Result<BackupArtifact> {
        let id = id.trim();
        if id.is_empty() || id.contains(['/', '\\']) || id.starts_with('.') {
            return Err(BackupError::not_found(id));
        }

        let prefixed = format!("{}{id}", backup::BACKUP_PREFIX);
        let candidates = [
            id.to_string(),
            format!("{id}{}", backup::ARCHIVE_EXTENSION),
            prefixed.clone(),
            format!("{prefixed}{}", backup::ARCHIVE_EXTENSION),
        ];

        candidates
            .iter()
            .find_map(|name| classify(&self.root.join(name)))
            .ok_or_else(|| BackupError::not_found(id))
    }

    /// 删除备份，返回被删除的备份
    pub fn delete(&self, id: &str) -> Result<BackupArtifact> {
        let artifact = self.get_path(id)?;
        artifact.remove()?;
        info!("已删除备份: {}", artifact.path().display());
        Ok(artifact)
    }
}

/// 判断路径是否是一个备份
fn classify(path: &Path) -> Option<BackupArtifact> {
    let name = path.file_name()?.to_str()?;

    if let Some(stem) = name.strip_suffix(backup::ARCHIVE_EXTENSION) {
        if is_backup_id(stem) && path.is_file() {
            return Some(BackupArtifact::Archive {
                id: stem.to_string(),
                path: path.to_path_buf(),
            });
        }
        return None;
    }

    if is_backup_id(name) && path.is_dir() {
        return Some(BackupArtifact::DirectorySnapshot {
            id: name.to_string(),
            path: path.to_path_buf(),
        });
    }

    None
}

fn load_descriptor(artifact: &BackupArtifact) -> Option<BackupDescriptor> {
    let result = match artifact {
        BackupArtifact::Archive { path, .. } => read_descriptor_from_archive(path),
        BackupArtifact::DirectorySnapshot { path, .. } => {
            BackupDescriptor::read_from_dir(path).map(Some)
        }
    };

    match result {
        Ok(descriptor) => descriptor,
        Err(e) => {
            warn!("无法读取备份元数据 {}: {}", artifact.path().display(), e);
            None
        }
    }
}
