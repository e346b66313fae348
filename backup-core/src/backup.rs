use crate::archive::{ArchiveBuilder, dir_size};
use crate::catalog::BackupCatalog;
use crate::config::AppConfig;
use crate::constants::{backup, layout};
use crate::datasource::{ApplyMode, DataSource, export_sql};
use crate::error::{BackupError, Result};
use crate::metadata::{BackupArtifact, BackupDescriptor, BackupMetadata, generate_backup_id};
use crate::restore::{RestoreCoordinator, RestoreOutcome, RestoreStage};
use crate::retention::RetentionManager;
use crate::sanitize::sanitize_config;
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// 备份服务
///
/// 创建、列出、恢复、删除备份。创建/恢复/删除共用一把操作锁，
/// 同一时刻只有一个操作在执行；恢复内部的安全备份在已持有的锁下完成。
#[derive(Clone)]
pub struct BackupService {
    inner: Arc<ServiceInner>,
}

struct ServiceInner {
    catalog: BackupCatalog,
    archive: ArchiveBuilder,
    source: Arc<dyn DataSource>,
    retention: RetentionManager,
    include_files: Vec<PathBuf>,
    created_by: String,
    op_lock: Mutex<()>,
}

/// BackupService 的构建器
pub struct BackupServiceBuilder {
    backup_dir: PathBuf,
    source: Arc<dyn DataSource>,
    archive: Option<ArchiveBuilder>,
    max_backups: usize,
    include_files: Vec<PathBuf>,
    created_by: String,
}

impl BackupServiceBuilder {
    pub fn max_backups(mut self, max_backups: usize) -> Self {
        self.max_backups = max_backups;
        self
    }

    pub fn include_files(mut self, files: Vec<PathBuf>) -> Self {
        self.include_files = files;
        self
    }

    pub fn created_by(mut self, created_by: impl Into<String>) -> Self {
        self.created_by = created_by.into();
        self
    }

    /// 指定归档方式，默认探测系统 tar
    pub fn archive_builder(mut self, archive: ArchiveBuilder) -> Self {
        self.archive = Some(archive);
        self
    }

    pub fn build(self) -> BackupService {
        BackupService {
            inner: Arc::new(ServiceInner {
                catalog: BackupCatalog::new(self.backup_dir),
                archive: self.archive.unwrap_or_else(ArchiveBuilder::detect),
                source: self.source,
                retention: RetentionManager::new(self.max_backups),
                include_files: self.include_files,
                created_by: self.created_by,
                op_lock: Mutex::new(()),
            }),
        }
    }
}

impl BackupService {
    pub fn builder<P: AsRef<Path>>(backup_dir: P, source: Arc<dyn DataSource>) -> BackupServiceBuilder {
        BackupServiceBuilder {
            backup_dir: backup_dir.as_ref().to_path_buf(),
            source,
            archive: None,
            max_backups: backup::DEFAULT_MAX_BACKUPS,
            include_files: Vec::new(),
            created_by: backup::DEFAULT_CREATED_BY.to_string(),
        }
    }

    /// 按配置文件创建服务
    pub fn from_config(config: &AppConfig, source: Arc<dyn DataSource>) -> Self {
        Self::builder(config.get_backup_dir(), source)
            .max_backups(config.backup.max_backups)
            .include_files(config.get_include_files())
            .created_by(config.backup.created_by.clone())
            .build()
    }

    /// 获取备份存储目录
    pub fn backup_dir(&self) -> &Path {
        self.inner.catalog.root()
    }

    pub fn max_backups(&self) -> usize {
        self.inner.retention.max_backups()
    }

    /// 创建一个新备份
    pub async fn create_backup(&self) -> Result<BackupMetadata> {
        let _guard = self.inner.op_lock.lock().await;
        self.create_locked().await
    }

    /// 已有操作在执行时立即返回 None，不排队
    pub async fn try_create_backup(&self) -> Result<Option<BackupMetadata>> {
        let Ok(_guard) = self.inner.op_lock.try_lock() else {
            debug!("已有备份/恢复操作在执行，跳过本次备份");
            return Ok(None);
        };
        self.create_locked().await.map(Some)
    }

    async fn create_locked(&self) -> Result<BackupMetadata> {
        let inner = self.inner.clone();
        tokio::task::spawn_blocking(move || inner.create_blocking(&[])).await?
    }

    /// 列出所有备份，最新的在前
    pub async fn list_backups(&self) -> Result<Vec<BackupMetadata>> {
        let inner = self.inner.clone();
        tokio::task::spawn_blocking(move || inner.catalog.list()).await?
    }

    /// 以默认的尽力模式恢复
    pub async fn restore_backup(&self, backup_id: &str) -> Result<RestoreOutcome> {
        self.restore_backup_with(backup_id, ApplyMode::default()).await
    }

    /// 恢复指定备份，恢复前总会先创建一个安全备份
    pub async fn restore_backup_with(
        &self,
        backup_id: &str,
        mode: ApplyMode,
    ) -> Result<RestoreOutcome> {
        let _guard = self.inner.op_lock.lock().await;
        let inner = self.inner.clone();
        let backup_id = backup_id.to_string();
        tokio::task::spawn_blocking(move || inner.restore_blocking(&backup_id, mode)).await?
    }

    /// 删除指定备份
    pub async fn delete_backup(&self, backup_id: &str) -> Result<()> {
        let _guard = self.inner.op_lock.lock().await;
        let inner = self.inner.clone();
        let backup_id = backup_id.to_string();
        tokio::task::spawn_blocking(move || inner.catalog.delete(&backup_id).map(|_| ())).await?
    }
}

impl ServiceInner {
    fn create_blocking(&self, protected: &[String]) -> Result<BackupMetadata> {
        self.catalog.ensure_root()?;
        let root = self.catalog.root();

        let now = Utc::now();
        let id = generate_backup_id(now, |candidate| self.catalog.exists(candidate));
        info!("开始创建备份: {}", id);

        // 工作目录离开作用域时自动删除，失败路径不留残余
        let staging = tempfile::Builder::new()
            .prefix(backup::STAGING_PREFIX)
            .tempdir_in(root)
            .map_err(|e| BackupError::storage(root, e))?;

        let descriptor = self.stage(staging.path(), &id, now)?;
        let artifact = self.archive.build(staging.path(), root, &id)?;

        if let Err(e) = staging.close() {
            warn!("清理工作目录失败: {}", e);
        }

        let file_size = match &artifact {
            BackupArtifact::Archive { path, .. } => fs::metadata(path)?.len(),
            BackupArtifact::DirectorySnapshot { path, .. } => dir_size(path),
        };
        let metadata =
            BackupMetadata::from_artifact(&artifact, file_size, descriptor.created_at, Some(&descriptor))?;

        info!(
            "备份创建成功: {} ({}，{} 字节)",
            metadata.id, metadata.format, metadata.file_size
        );

        if let Err(e) = self.retention.enforce(&self.catalog, protected) {
            warn!("清理旧备份失败: {}", e);
        }

        Ok(metadata)
    }

    /// 在工作目录中写入 database.sql、files/ 和 metadata.json
    fn stage(&self, dir: &Path, id: &str, now: DateTime<Utc>) -> Result<BackupDescriptor> {
        let export = export_sql(self.source.as_ref())?;
        fs::write(dir.join(layout::DATABASE_FILE), &export.sql)?;
        for warning in &export.warnings {
            warn!("表 {} 未导出: {}", warning.table, warning.reason);
        }

        let files_dir = dir.join(layout::FILES_DIR);
        fs::create_dir_all(&files_dir)?;
        let mut files = Vec::new();
        let mut used_names = HashSet::new();

        for path in &self.include_files {
            if !path.is_file() {
                warn!("配置文件不存在，跳过: {}", path.display());
                continue;
            }
            let Some(name) = path.file_name().map(|n| n.to_string_lossy().to_string()) else {
                continue;
            };
            if !used_names.insert(name.clone()) {
                warn!("配置文件重名，跳过: {}", path.display());
                continue;
            }

            let content = fs::read_to_string(path)?;
            let (sanitized, redacted) = sanitize_config(&content);
            fs::write(files_dir.join(&name), sanitized)?;
            debug!("配置文件 {} 已脱敏 {} 个键", path.display(), redacted);
            files.push(name);
        }

        let raw_files = self.source.raw_files();
        if !raw_files.is_empty() {
            let raw_dir = files_dir.join(layout::RAW_DATABASE_DIR);
            fs::create_dir_all(&raw_dir)?;
            for raw in &raw_files {
                let Some(name) = raw.file_name() else {
                    continue;
                };
                fs::copy(raw, raw_dir.join(name))?;
                files.push(format!(
                    "{}/{}",
                    layout::RAW_DATABASE_DIR,
                    name.to_string_lossy()
                ));
            }
            info!("已拷贝 {} 个原始数据文件", raw_files.len());
        }

        let mut descriptor =
            BackupDescriptor::new(id, now, self.source.database_type(), &self.created_by);
        descriptor.tables = export.tables;
        descriptor.warnings = export.warnings;
        descriptor.files = files;
        descriptor.write_to_dir(dir)?;

        Ok(descriptor)
    }

    fn restore_blocking(&self, backup_id: &str, mode: ApplyMode) -> Result<RestoreOutcome> {
        let artifact = self
            .catalog
            .get_path(backup_id)
            .map_err(|e| e.at_stage(RestoreStage::Idle))?;

        // 恢复源在安全备份触发的清理中不能被删除
        let protected = vec![artifact.id().to_string()];

        let mut coordinator =
            RestoreCoordinator::new(self.source.as_ref(), &self.archive, self.catalog.root())
                .with_mode(mode);
        coordinator.run(&artifact, || self.create_blocking(&protected))
    }
}
