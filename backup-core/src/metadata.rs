use crate::constants::{backup, layout};
use crate::datasource::ExportWarning;
use crate::error::{BackupError, Result};
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

/// 备份ID命名规则: backup-YYYYMMDD-HHMMSS-mmm[-N]
static BACKUP_ID_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(backup-\d{8}-\d{6}-\d{3})(?:-(\d+))?$").expect("备份ID正则表达式无效")
});

/// 是否符合备份ID命名规则
pub fn is_backup_id(name: &str) -> bool {
    BACKUP_ID_PATTERN.is_match(name)
}

/// 按时间部分和冲突序号比较备份ID，`-10` 排在 `-9` 之后
pub fn compare_backup_ids(a: &str, b: &str) -> Ordering {
    match (id_sort_key(a), id_sort_key(b)) {
        (Some(left), Some(right)) => left.cmp(&right).then_with(|| a.cmp(b)),
        _ => a.cmp(b),
    }
}

fn id_sort_key(id: &str) -> Option<(&str, u64)> {
    let caps = BACKUP_ID_PATTERN.captures(id)?;
    let base = caps.get(1)?.as_str();
    let suffix = match caps.get(2) {
        Some(m) => m.as_str().parse().ok()?,
        None => 0,
    };
    Some((base, suffix))
}

/// 由时间生成备份ID，同一毫秒内已存在时追加序号
pub fn generate_backup_id(now: DateTime<Utc>, exists: impl Fn(&str) -> bool) -> String {
    let base = format!(
        "{}{}",
        backup::BACKUP_PREFIX,
        now.format(backup::ID_TIME_FORMAT)
    );
    if !exists(&base) {
        return base;
    }

    let mut suffix = 1u32;
    loop {
        let candidate = format!("{base}-{suffix}");
        if !exists(&candidate) {
            return candidate;
        }
        suffix += 1;
    }
}

/// 备份的存储形式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactFormat {
    Archive,
    Directory,
}

impl std::fmt::Display for ArtifactFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ArtifactFormat::Archive => write!(f, "archive"),
            ArtifactFormat::Directory => write!(f, "directory"),
        }
    }
}

/// 磁盘上的一个备份，压缩归档和目录两种形式用同一个ID寻址
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackupArtifact {
    Archive { id: String, path: PathBuf },
    DirectorySnapshot { id: String, path: PathBuf },
}

impl BackupArtifact {
    pub fn id(&self) -> &str {
        match self {
            BackupArtifact::Archive { id, .. } | BackupArtifact::DirectorySnapshot { id, .. } => id,
        }
    }

    pub fn path(&self) -> &Path {
        match self {
            BackupArtifact::Archive { path, .. }
            | BackupArtifact::DirectorySnapshot { path, .. } => path,
        }
    }

    pub fn format(&self) -> ArtifactFormat {
        match self {
            BackupArtifact::Archive { .. } => ArtifactFormat::Archive,
            BackupArtifact::DirectorySnapshot { .. } => ArtifactFormat::Directory,
        }
    }

    /// 删除该备份（文件或整个目录）
    pub fn remove(&self) -> Result<()> {
        match self {
            BackupArtifact::Archive { path, .. } => fs::remove_file(path)?,
            BackupArtifact::DirectorySnapshot { path, .. } => fs::remove_dir_all(path)?,
        }
        Ok(())
    }
}

/// 写在每个备份根目录下的 metadata.json
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupDescriptor {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub version: String,
    pub database_type: String,
    pub created_by: String,
    #[serde(default)]
    pub tables: Vec<String>,
    #[serde(default)]
    pub warnings: Vec<ExportWarning>,
    #[serde(default)]
    pub files: Vec<String>,
}

impl BackupDescriptor {
    pub fn new(
        id: impl Into<String>,
        created_at: DateTime<Utc>,
        database_type: impl Into<String>,
        created_by: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            created_at,
            version: layout::DESCRIPTOR_VERSION.to_string(),
            database_type: database_type.into(),
            created_by: created_by.into(),
            tables: Vec::new(),
            warnings: Vec::new(),
            files: Vec::new(),
        }
    }

    /// 从备份根目录读取
    pub fn read_from_dir(dir: &Path) -> Result<Self> {
        let path = dir.join(layout::METADATA_FILE);
        let content = fs::read_to_string(&path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// 写入备份根目录
    pub fn write_to_dir(&self, dir: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        fs::write(dir.join(layout::METADATA_FILE), content)?;
        Ok(())
    }

    pub fn embedded(&self) -> EmbeddedInfo {
        EmbeddedInfo {
            version: self.version.clone(),
            database_type: self.database_type.clone(),
            created_by: self.created_by.clone(),
        }
    }
}

/// metadata.json 中对外暴露的部分
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmbeddedInfo {
    pub version: String,
    pub database_type: String,
    pub created_by: String,
}

/// 目录格式备份的标记文件内容
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FormatMarker {
    pub format: ArtifactFormat,
    pub id: String,
    pub note: String,
}

impl FormatMarker {
    pub fn directory(id: impl Into<String>, reason: &str) -> Self {
        Self {
            format: ArtifactFormat::Directory,
            id: id.into(),
            note: format!(
                "Uncompressed directory snapshot: no compression tool was available ({reason}). \
                 Contents are identical to the archive format."
            ),
        }
    }

    pub fn write_to_dir(&self, dir: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        fs::write(dir.join(layout::FORMAT_MARKER_FILE), content)?;
        Ok(())
    }

    pub fn exists_in(dir: &Path) -> bool {
        dir.join(layout::FORMAT_MARKER_FILE).is_file()
    }
}

/// 对外返回的备份信息
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupMetadata {
    pub id: String,
    pub file_name: String,
    pub file_path: PathBuf,
    pub file_size: u64,
    pub created_at: DateTime<Utc>,
    pub format: ArtifactFormat,
    /// metadata.json 不可读时为 None
    pub embedded: Option<EmbeddedInfo>,
    /// 本次导出中被跳过的表
    #[serde(default)]
    pub warnings: Vec<ExportWarning>,
}

impl BackupMetadata {
    pub fn from_artifact(
        artifact: &BackupArtifact,
        file_size: u64,
        created_at: DateTime<Utc>,
        descriptor: Option<&BackupDescriptor>,
    ) -> Result<Self> {
        let file_name = artifact
            .path()
            .file_name()
            .ok_or_else(|| BackupError::custom("无法获取备份文件名"))?
            .to_string_lossy()
            .to_string();

        Ok(Self {
            id: artifact.id().to_string(),
            file_name,
            file_path: artifact.path().to_path_buf(),
            file_size,
            created_at,
            format: artifact.format(),
            embedded: descriptor.map(BackupDescriptor::embedded),
            warnings: descriptor.map(|d| d.warnings.clone()).unwrap_or_default(),
        })
    }
}
