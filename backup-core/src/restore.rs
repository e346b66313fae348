use crate::archive::ArchiveBuilder;
use crate::constants::{backup, layout};
use crate::datasource::{ApplyMode, DataSource, StatementFailure, import_sql};
use crate::error::{BackupError, Result};
use crate::metadata::{BackupArtifact, BackupDescriptor, BackupMetadata};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::{debug, error, info, warn};

/// 恢复流程所处的阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RestoreStage {
    Idle,
    Extracting,
    Validating,
    SafetyBackupInProgress,
    Applying,
    CleaningUp,
    Done,
    Failed,
}

impl fmt::Display for RestoreStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RestoreStage::Idle => "Idle",
            RestoreStage::Extracting => "Extracting",
            RestoreStage::Validating => "Validating",
            RestoreStage::SafetyBackupInProgress => "SafetyBackupInProgress",
            RestoreStage::Applying => "Applying",
            RestoreStage::CleaningUp => "CleaningUp",
            RestoreStage::Done => "Done",
            RestoreStage::Failed => "Failed",
        };
        f.write_str(name)
    }
}

/// 恢复结果
#[derive(Debug, Clone, Serialize)]
pub struct RestoreOutcome {
    /// 所有语句都执行成功时为 true
    pub success: bool,
    pub backup_id: String,
    /// 恢复前自动创建的安全备份，可用于撤销本次恢复
    pub safety_backup_id: String,
    pub restored_at: DateTime<Utc>,
    pub statements_applied: usize,
    #[serde(skip)]
    pub failed_statements: Vec<StatementFailure>,
}

/// 解压后的备份内容
///
/// 归档格式解压到临时目录，目录格式原地使用。
#[derive(Debug)]
pub struct ExtractedBackup {
    root: PathBuf,
    temp: Option<TempDir>,
}

impl ExtractedBackup {
    pub fn prepare(
        artifact: &BackupArtifact,
        archive: &ArchiveBuilder,
        work_root: &Path,
    ) -> Result<Self> {
        match artifact {
            BackupArtifact::DirectorySnapshot { path, .. } => {
                debug!("目录格式备份，原地读取: {}", path.display());
                Ok(Self {
                    root: path.clone(),
                    temp: None,
                })
            }
            BackupArtifact::Archive { path, .. } => {
                let temp = tempfile::Builder::new()
                    .prefix(backup::EXTRACT_PREFIX)
                    .tempdir_in(work_root)
                    .map_err(|e| BackupError::storage(work_root, e))?;
                archive.extract(path, temp.path())?;
                debug!("归档已解压到: {}", temp.path().display());
                Ok(Self {
                    root: temp.path().to_path_buf(),
                    temp: Some(temp),
                })
            }
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// 删除临时解压目录，原地使用的目录不动
    pub fn cleanup(self) -> Result<()> {
        if let Some(temp) = self.temp {
            temp.close()?;
        }
        Ok(())
    }
}

/// 单次恢复的执行者
///
/// 解压 -> 校验 -> 安全备份 -> 导入 -> 清理。任何阶段失败都带着阶段名返回。
pub struct RestoreCoordinator<'a> {
    source: &'a dyn DataSource,
    archive: &'a ArchiveBuilder,
    work_root: &'a Path,
    mode: ApplyMode,
    stage: RestoreStage,
}

impl<'a> RestoreCoordinator<'a> {
    pub fn new(source: &'a dyn DataSource, archive: &'a ArchiveBuilder, work_root: &'a Path) -> Self {
        Self {
            source,
            archive,
            work_root,
            mode: ApplyMode::default(),
            stage: RestoreStage::Idle,
        }
    }

    pub fn with_mode(mut self, mode: ApplyMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn stage(&self) -> RestoreStage {
        self.stage
    }

    fn enter(&mut self, stage: RestoreStage) {
        debug!("恢复阶段: {} -> {}", self.stage, stage);
        self.stage = stage;
    }

    fn fail(&mut self, err: BackupError) -> BackupError {
        let err = err.at_stage(self.stage);
        error!("恢复失败: {}", err);
        self.stage = RestoreStage::Failed;
        err
    }

    /// 执行恢复
    ///
    /// `safety_backup` 在校验通过后、修改任何数据之前调用。
    pub fn run<F>(&mut self, artifact: &BackupArtifact, safety_backup: F) -> Result<RestoreOutcome>
    where
        F: FnOnce() -> Result<BackupMetadata>,
    {
        info!("开始恢复备份: {}", artifact.id());

        self.enter(RestoreStage::Extracting);
        let extracted = ExtractedBackup::prepare(artifact, self.archive, self.work_root)
            .map_err(|e| self.fail(e))?;

        let result = self.validate_and_apply(&extracted, artifact.id(), safety_backup);
        let failed_stage = self.stage;

        self.enter(RestoreStage::CleaningUp);
        let cleanup = extracted.cleanup();

        match (result, cleanup) {
            (Ok(outcome), Ok(())) => {
                self.enter(RestoreStage::Done);
                info!(
                    "恢复完成: {} (安全备份: {})",
                    outcome.backup_id, outcome.safety_backup_id
                );
                Ok(outcome)
            }
            (Ok(outcome), Err(e)) => {
                warn!(
                    "数据已恢复，但临时目录清理失败；安全备份: {}",
                    outcome.safety_backup_id
                );
                Err(self.fail(e))
            }
            (Err(e), cleanup) => {
                if let Err(cleanup_err) = cleanup {
                    warn!("清理临时目录失败: {}", cleanup_err);
                }
                self.stage = failed_stage;
                Err(self.fail(e))
            }
        }
    }

    fn validate_and_apply<F>(
        &mut self,
        extracted: &ExtractedBackup,
        backup_id: &str,
        safety_backup: F,
    ) -> Result<RestoreOutcome>
    where
        F: FnOnce() -> Result<BackupMetadata>,
    {
        self.enter(RestoreStage::Validating);
        let descriptor = validate(extracted.root())?;
        debug!(
            "备份校验通过: {} ({}，{} 张表)",
            descriptor.id,
            descriptor.database_type,
            descriptor.tables.len()
        );

        self.enter(RestoreStage::SafetyBackupInProgress);
        let safety = safety_backup()?;
        info!("安全备份已创建: {}", safety.id);

        self.enter(RestoreStage::Applying);
        let sql = fs::read_to_string(extracted.root().join(layout::DATABASE_FILE))?;
        let report = import_sql(self.source, &sql, self.mode)?;

        let raw_dir = extracted
            .root()
            .join(layout::FILES_DIR)
            .join(layout::RAW_DATABASE_DIR);
        if raw_dir.is_dir() {
            let restored = self.source.restore_raw_files(&raw_dir)?;
            debug!("恢复原始数据文件 {} 个", restored);
        }

        if !descriptor.files.is_empty() {
            info!(
                "配置文件不会自动恢复（{} 个文件保留在备份中，如需使用请手动比对）",
                descriptor.files.len()
            );
        }

        Ok(RestoreOutcome {
            success: report.failed.is_empty(),
            backup_id: backup_id.to_string(),
            safety_backup_id: safety.id,
            restored_at: Utc::now(),
            statements_applied: report.applied,
            failed_statements: report.failed,
        })
    }
}

/// 解压根目录下必须有可解析的 metadata.json 和 database.sql
fn validate(root: &Path) -> Result<BackupDescriptor> {
    let metadata_path = root.join(layout::METADATA_FILE);
    if !metadata_path.is_file() {
        return Err(BackupError::corrupt(format!(
            "缺少 {}",
            layout::METADATA_FILE
        )));
    }

    let descriptor = BackupDescriptor::read_from_dir(root).map_err(|e| {
        BackupError::corrupt(format!("{} 无法解析: {e}", layout::METADATA_FILE))
    })?;

    if !root.join(layout::DATABASE_FILE).is_file() {
        return Err(BackupError::corrupt(format!(
            "缺少 {}",
            layout::DATABASE_FILE
        )));
    }

    Ok(descriptor)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datasource::DuckDbSource;
    use crate::metadata::ArtifactFormat;
    use std::cell::Cell;
    use tempfile::tempdir;

    fn safety_metadata(id: &str, root: &Path) -> BackupMetadata {
        BackupMetadata {
            id: id.to_string(),
            file_name: id.to_string(),
            file_path: root.join(id),
            file_size: 0,
            created_at: Utc::now(),
            format: ArtifactFormat::Directory,
            embedded: None,
            warnings: Vec::new(),
        }
    }

    fn write_backup(root: &Path, id: &str, sql: &str) -> BackupArtifact {
        let dir = root.join(id);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join(layout::DATABASE_FILE), sql).unwrap();
        BackupDescriptor::new(id, Utc::now(), "duckdb", "tester")
            .write_to_dir(&dir)
            .unwrap();
        BackupArtifact::DirectorySnapshot {
            id: id.to_string(),
            path: dir,
        }
    }

    #[test]
    fn test_stage_display_names() {
        assert_eq!(RestoreStage::SafetyBackupInProgress.to_string(), "SafetyBackupInProgress");
        assert_eq!(RestoreStage::CleaningUp.to_string(), "CleaningUp");
    }

    #[test]
    fn test_successful_run_applies_after_safety_backup() {
        let temp_dir = tempdir().unwrap();
        let artifact = write_backup(
            temp_dir.path(),
            "backup-20260101-020000-000",
            "CREATE TABLE t (id INTEGER);\nINSERT INTO t VALUES (1);\nINSERT INTO t VALUES (2);\n",
        );
        let source = DuckDbSource::in_memory().unwrap();
        let archive = ArchiveBuilder::directory_only();

        let safety_called = Cell::new(false);
        let mut coordinator = RestoreCoordinator::new(&source, &archive, temp_dir.path());
        let outcome = coordinator
            .run(&artifact, || {
                // 安全备份发生在导入之前
                assert!(source.list_tables().unwrap().is_empty());
                safety_called.set(true);
                Ok(safety_metadata("backup-20260101-030000-000", temp_dir.path()))
            })
            .unwrap();

        assert!(safety_called.get());
        assert!(outcome.success);
        assert_eq!(outcome.backup_id, "backup-20260101-020000-000");
        assert_eq!(outcome.safety_backup_id, "backup-20260101-030000-000");
        assert_eq!(outcome.statements_applied, 3);
        assert_eq!(coordinator.stage(), RestoreStage::Done);
        assert_eq!(source.query_count("t").unwrap(), 2);
        // 目录格式原地使用，恢复后不删除
        assert!(artifact.path().join(layout::METADATA_FILE).is_file());
    }

    #[test]
    fn test_missing_metadata_is_corrupt_without_mutation() {
        let temp_dir = tempdir().unwrap();
        let artifact = write_backup(
            temp_dir.path(),
            "backup-20260101-020000-000",
            "CREATE TABLE t (id INTEGER);",
        );
        fs::remove_file(artifact.path().join(layout::METADATA_FILE)).unwrap();

        let source = DuckDbSource::in_memory().unwrap();
        let archive = ArchiveBuilder::directory_only();
        let mut coordinator = RestoreCoordinator::new(&source, &archive, temp_dir.path());

        let err = coordinator
            .run(&artifact, || panic!("校验失败时不应创建安全备份"))
            .unwrap_err();

        assert!(err.is_corrupt());
        assert_eq!(err.stage(), Some(RestoreStage::Validating));
        assert_eq!(coordinator.stage(), RestoreStage::Failed);
        assert!(source.list_tables().unwrap().is_empty());
    }

    #[test]
    fn test_safety_backup_failure_aborts_before_apply() {
        let temp_dir = tempdir().unwrap();
        let artifact = write_backup(
            temp_dir.path(),
            "backup-20260101-020000-000",
            "CREATE TABLE t (id INTEGER);",
        );
        let source = DuckDbSource::in_memory().unwrap();
        let archive = ArchiveBuilder::directory_only();
        let mut coordinator = RestoreCoordinator::new(&source, &archive, temp_dir.path());

        let err = coordinator
            .run(&artifact, || Err(BackupError::custom("磁盘已满")))
            .unwrap_err();

        assert_eq!(err.stage(), Some(RestoreStage::SafetyBackupInProgress));
        assert!(source.list_tables().unwrap().is_empty());
    }

    #[test]
    fn test_partial_apply_is_not_reported_as_success() {
        let temp_dir = tempdir().unwrap();
        let artifact = write_backup(
            temp_dir.path(),
            "backup-20260101-020000-000",
            "CREATE TABLE t (id INTEGER);\nINSERT INTO nowhere VALUES (1);\n",
        );
        let source = DuckDbSource::in_memory().unwrap();
        let archive = ArchiveBuilder::directory_only();
        let mut coordinator = RestoreCoordinator::new(&source, &archive, temp_dir.path());

        let outcome = coordinator
            .run(&artifact, || {
                Ok(safety_metadata("backup-20260101-030000-000", temp_dir.path()))
            })
            .unwrap();

        assert!(!outcome.success);
        assert_eq!(outcome.statements_applied, 1);
        assert_eq!(outcome.failed_statements.len(), 1);
    }
}
