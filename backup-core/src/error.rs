use crate::restore::RestoreStage;
use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, BackupError>;

#[derive(Error, Debug)]
pub enum BackupError {
    #[error("备份不存在: {0}")]
    NotFound(String),

    #[error("备份已损坏: {0}")]
    CorruptBackup(String),

    /// 压缩/解压工具不可用，调用方应走降级路径
    #[error("外部工具不可用: {0}")]
    ToolUnavailable(String),

    #[error("备份目录不可访问: {path}: {source}")]
    StorageUnavailable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("归档操作失败: {0}")]
    Archive(String),

    #[error("恢复在 {stage} 阶段失败: {source}")]
    Restore {
        stage: RestoreStage,
        #[source]
        source: Box<BackupError>,
    },

    #[error("定时配置无效: {0}")]
    InvalidSchedule(String),

    #[error("配置错误: {0}")]
    Config(#[from] toml::de::Error),

    #[error("DuckDB数据库错误: {0}")]
    DuckDb(String),

    #[error("IO 错误: {0}")]
    Io(#[from] std::io::Error),

    #[error("序列化错误: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("任务执行错误: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("目录遍历错误: {0}")]
    WalkDir(#[from] walkdir::Error),

    #[error("路径错误: {0}")]
    StripPrefix(#[from] std::path::StripPrefixError),

    #[error("自定义错误: {0}")]
    Custom(String),
}

// 为DuckDB错误实现From trait
impl From<duckdb::Error> for BackupError {
    fn from(err: duckdb::Error) -> Self {
        BackupError::DuckDb(err.to_string())
    }
}

impl BackupError {
    pub fn custom(msg: impl Into<String>) -> Self {
        Self::Custom(msg.into())
    }

    pub fn archive(msg: impl Into<String>) -> Self {
        Self::Archive(msg.into())
    }

    pub fn corrupt(msg: impl Into<String>) -> Self {
        Self::CorruptBackup(msg.into())
    }

    pub fn not_found(id: impl Into<String>) -> Self {
        Self::NotFound(id.into())
    }

    pub fn storage(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::StorageUnavailable {
            path: path.into(),
            source,
        }
    }

    /// 给错误附加恢复阶段，已附加过的不再重复包装
    pub fn at_stage(self, stage: RestoreStage) -> Self {
        match self {
            err @ BackupError::Restore { .. } => err,
            other => BackupError::Restore {
                stage,
                source: Box::new(other),
            },
        }
    }

    /// 剥掉恢复阶段包装，返回最底层的错误
    pub fn root(&self) -> &BackupError {
        match self {
            BackupError::Restore { source, .. } => source.root(),
            other => other,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self.root(), BackupError::NotFound(_))
    }

    pub fn is_corrupt(&self) -> bool {
        matches!(self.root(), BackupError::CorruptBackup(_))
    }

    /// 恢复失败时所处的阶段
    pub fn stage(&self) -> Option<RestoreStage> {
        match self {
            BackupError::Restore { stage, .. } => Some(*stage),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_wrapping_keeps_root() {
        let err = BackupError::corrupt("metadata.json 缺失").at_stage(RestoreStage::Validating);
        assert_eq!(err.stage(), Some(RestoreStage::Validating));
        assert!(err.is_corrupt());
        assert!(err.to_string().contains("Validating"));

        // 再次包装不会覆盖第一次记录的阶段
        let err = err.at_stage(RestoreStage::CleaningUp);
        assert_eq!(err.stage(), Some(RestoreStage::Validating));
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: BackupError = io_err.into();
        assert!(matches!(err, BackupError::Io(_)));
        assert!(!err.is_not_found());
    }
}
