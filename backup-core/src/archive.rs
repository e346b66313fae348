use crate::constants::{backup, layout};
use crate::error::{BackupError, Result};
use crate::metadata::{BackupArtifact, BackupDescriptor, FormatMarker};
use std::fs::{self, File};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// 把工作目录打包成备份
///
/// 优先调用系统 tar 生成 `<id>.tar.gz`；工具不存在、非 POSIX 平台或执行失败时，
/// 降级为拷贝成同名目录并写入格式标记文件。
#[derive(Debug, Clone)]
pub struct ArchiveBuilder {
    tar_program: Option<PathBuf>,
}

impl ArchiveBuilder {
    /// 探测系统上的 tar 命令
    pub fn detect() -> Self {
        let tar_program = if cfg!(unix) {
            which::which("tar").ok()
        } else {
            None
        };

        match &tar_program {
            Some(path) => debug!("使用压缩工具: {}", path.display()),
            None => debug!("未找到 tar 命令，备份将以目录格式保存"),
        }

        Self { tar_program }
    }

    /// 指定 tar 程序路径
    pub fn with_program<P: AsRef<Path>>(program: P) -> Self {
        Self {
            tar_program: Some(program.as_ref().to_path_buf()),
        }
    }

    /// 不使用压缩工具，总是生成目录格式
    pub fn directory_only() -> Self {
        Self { tar_program: None }
    }

    pub fn tar_program(&self) -> Option<&Path> {
        self.tar_program.as_deref()
    }

    /// 把 staging 目录打包到 root 下，返回生成的备份
    ///
    /// 失败时删除半成品，不留下孤立文件。
    pub fn build(&self, staging: &Path, root: &Path, id: &str) -> Result<BackupArtifact> {
        let archive_path = root.join(format!("{id}{}", backup::ARCHIVE_EXTENSION));

        match self.compress(staging, &archive_path) {
            Ok(()) => {
                info!("备份归档已生成: {}", archive_path.display());
                return Ok(BackupArtifact::Archive {
                    id: id.to_string(),
                    path: archive_path,
                });
            }
            Err(e) => {
                warn!("压缩归档失败，降级为目录格式: {}", e);
                remove_partial_file(&archive_path);
                self.copy_as_directory(staging, root, id, &e.to_string())
            }
        }
    }

    fn compress(&self, staging: &Path, archive_path: &Path) -> Result<()> {
        if !cfg!(unix) {
            return Err(BackupError::ToolUnavailable("当前平台不支持 tar 压缩".to_string()));
        }
        let program = self
            .tar_program
            .as_ref()
            .ok_or_else(|| BackupError::ToolUnavailable("未找到 tar 命令".to_string()))?;

        let output = Command::new(program)
            .arg("-czf")
            .arg(archive_path)
            .arg("-C")
            .arg(staging)
            .arg(".")
            .output()
            .map_err(|e| {
                BackupError::ToolUnavailable(format!("无法执行 {}: {e}", program.display()))
            })?;

        if !output.status.success() {
            return Err(BackupError::ToolUnavailable(format!(
                "tar 执行失败: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        fsync_file(archive_path)
    }

    fn copy_as_directory(
        &self,
        staging: &Path,
        root: &Path,
        id: &str,
        reason: &str,
    ) -> Result<BackupArtifact> {
        let target = root.join(id);
        if target.exists() {
            return Err(BackupError::archive(format!(
                "目标目录已存在: {}",
                target.display()
            )));
        }

        let result = copy_dir_recursive(staging, &target)
            .and_then(|_| FormatMarker::directory(id, reason).write_to_dir(&target));

        if let Err(e) = result {
            if target.exists() {
                if let Err(cleanup_err) = fs::remove_dir_all(&target) {
                    warn!("清理未完成的目录备份失败: {}", cleanup_err);
                }
            }
            return Err(e);
        }

        info!("目录格式备份已生成: {}", target.display());
        Ok(BackupArtifact::DirectorySnapshot {
            id: id.to_string(),
            path: target,
        })
    }

    /// 解压归档到目标目录
    ///
    /// 系统 tar 不可用时使用内置解码器。
    pub fn extract(&self, archive_path: &Path, dest: &Path) -> Result<()> {
        fs::create_dir_all(dest)?;

        match self.extract_with_tool(archive_path, dest) {
            Ok(()) => Ok(()),
            Err(BackupError::ToolUnavailable(reason)) => {
                debug!("{}，使用内置解码器解压", reason);
                extract_in_process(archive_path, dest)
            }
            Err(e) => Err(e),
        }
    }

    fn extract_with_tool(&self, archive_path: &Path, dest: &Path) -> Result<()> {
        if !cfg!(unix) {
            return Err(BackupError::ToolUnavailable("当前平台不支持 tar 解压".to_string()));
        }
        let program = self
            .tar_program
            .as_ref()
            .ok_or_else(|| BackupError::ToolUnavailable("未找到 tar 命令".to_string()))?;

        let output = Command::new(program)
            .arg("-xzf")
            .arg(archive_path)
            .arg("-C")
            .arg(dest)
            .output()
            .map_err(|e| {
                BackupError::ToolUnavailable(format!("无法执行 {}: {e}", program.display()))
            })?;

        if !output.status.success() {
            return Err(BackupError::archive(format!(
                "解压归档失败 {}: {}",
                archive_path.display(),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        Ok(())
    }
}

impl Default for ArchiveBuilder {
    fn default() -> Self {
        Self::detect()
    }
}

fn extract_in_process(archive_path: &Path, dest: &Path) -> Result<()> {
    use flate2::read::GzDecoder;
    use tar::Archive;

    let file = File::open(archive_path)?;
    let decoder = GzDecoder::new(file);
    let mut archive = Archive::new(decoder);

    archive
        .unpack(dest)
        .map_err(|e| BackupError::archive(format!("解压归档失败: {e}")))?;

    Ok(())
}

/// 不解压整个归档，只读出其中的 metadata.json
pub fn read_descriptor_from_archive(archive_path: &Path) -> Result<Option<BackupDescriptor>> {
    use flate2::read::GzDecoder;
    use tar::Archive;

    let file = File::open(archive_path)?;
    let mut archive = Archive::new(GzDecoder::new(file));

    for entry in archive.entries()? {
        let mut entry = entry?;
        let is_metadata = {
            let path = entry.path()?;
            let normalized = path.to_string_lossy();
            normalized.trim_start_matches("./") == layout::METADATA_FILE
        };

        if is_metadata {
            let mut contents = String::new();
            entry.read_to_string(&mut contents)?;
            return Ok(Some(serde_json::from_str(&contents)?));
        }
    }

    Ok(None)
}

/// 递归拷贝目录
pub(crate) fn copy_dir_recursive(src: &Path, dst: &Path) -> Result<()> {
    fs::create_dir_all(dst)?;

    for entry in WalkDir::new(src).min_depth(1) {
        let entry = entry?;
        let relative = entry.path().strip_prefix(src)?;
        let target = dst.join(relative);

        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)?;
        } else if entry.file_type().is_file() {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::copy(entry.path(), &target)?;
        }
    }

    Ok(())
}

/// 目录下所有文件大小之和
pub(crate) fn dir_size(dir: &Path) -> u64 {
    WalkDir::new(dir)
        .into_iter()
        .flatten()
        .filter(|entry| entry.file_type().is_file())
        .filter_map(|entry| entry.metadata().ok())
        .map(|metadata| metadata.len())
        .sum()
}

fn fsync_file(path: &Path) -> Result<()> {
    let file = File::open(path)?;
    file.sync_all()?;
    Ok(())
}

fn remove_partial_file(path: &Path) {
    if path.exists() {
        if let Err(e) = fs::remove_file(path) {
            warn!("清理未完成的归档失败 {}: {}", path.display(), e);
        }
    }
}
