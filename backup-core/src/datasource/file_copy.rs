use super::{ColumnInfo, DataSource, PortableType};
use crate::{BackupError, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// 没有 SQL 内省能力的单文件数据源
///
/// 导出只写占位说明，真正的备份是数据文件本身的拷贝。
#[derive(Debug, Clone)]
pub struct FileCopySource {
    path: PathBuf,
}

impl FileCopySource {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn unsupported(&self, what: &str) -> BackupError {
        BackupError::custom(format!(
            "文件型数据源不支持{what}: {}",
            self.path.display()
        ))
    }
}

impl DataSource for FileCopySource {
    fn database_type(&self) -> &'static str {
        "file"
    }

    fn supports_introspection(&self) -> bool {
        false
    }

    fn list_tables(&self) -> Result<Vec<String>> {
        Ok(Vec::new())
    }

    fn describe_table(&self, _table: &str) -> Result<Vec<ColumnInfo>> {
        Err(self.unsupported("表结构内省"))
    }

    fn map_type(&self, _column: &ColumnInfo) -> PortableType {
        PortableType::Text
    }

    fn read_rows(&self, _table: &str, _columns: &[ColumnInfo]) -> Result<Vec<Vec<Option<String>>>> {
        Err(self.unsupported("按行读取"))
    }

    fn execute(&self, _statement: &str) -> Result<()> {
        Err(self.unsupported("执行 SQL"))
    }

    fn raw_files(&self) -> Vec<PathBuf> {
        if self.path.is_file() {
            vec![self.path.clone()]
        } else {
            Vec::new()
        }
    }

    fn restore_raw_files(&self, dir: &Path) -> Result<usize> {
        let file_name = self
            .path
            .file_name()
            .ok_or_else(|| BackupError::custom(format!("无效的数据文件路径: {}", self.path.display())))?;
        let backup_copy = dir.join(file_name);

        if !backup_copy.is_file() {
            warn!("备份中没有数据文件副本: {}", backup_copy.display());
            return Ok(0);
        }

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::copy(&backup_copy, &self.path)?;
        info!("数据文件已恢复: {}", self.path.display());
        Ok(1)
    }
}
