use crate::constants::{backup, config};
use crate::error::{BackupError, Result};
use crate::scheduler::ScheduleConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// 应用配置结构
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AppConfig {
    pub backup: BackupConfig,
    pub database: DatabaseConfig,
    #[serde(default)]
    pub schedule: ScheduleConfig,
}

/// 备份相关配置
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct BackupConfig {
    pub storage_dir: String,
    #[serde(default = "default_max_backups")]
    pub max_backups: usize,
    #[serde(default = "default_created_by")]
    pub created_by: String,
    /// 需要脱敏后一并备份的配置文件
    #[serde(default)]
    pub include_files: Vec<String>,
}

/// 数据源相关配置
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct DatabaseConfig {
    #[serde(rename = "type", default)]
    pub kind: DatabaseKind,
    pub path: String,
}

/// 支持的数据源后端
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseKind {
    #[default]
    DuckDb,
    /// 无 SQL 内省能力，只做文件拷贝
    File,
}

fn default_max_backups() -> usize {
    backup::DEFAULT_MAX_BACKUPS
}

fn default_created_by() -> String {
    backup::DEFAULT_CREATED_BY.to_string()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            backup: BackupConfig {
                storage_dir: backup::get_default_storage_dir()
                    .to_string_lossy()
                    .to_string(),
                max_backups: backup::DEFAULT_MAX_BACKUPS,
                created_by: backup::DEFAULT_CREATED_BY.to_string(),
                include_files: vec![".env".to_string()],
            },
            database: DatabaseConfig {
                kind: DatabaseKind::DuckDb,
                path: config::DEFAULT_DATABASE_PATH.to_string(),
            },
            schedule: ScheduleConfig::default(),
        }
    }
}

impl AppConfig {
    /// 智能查找并加载配置文件
    /// 按优先级查找：config.toml -> backup.toml -> .backup.toml
    pub fn find_and_load_config() -> Result<Self> {
        for config_file in &config::CONFIG_FILE_CANDIDATES {
            if Path::new(config_file).exists() {
                tracing::info!("找到配置文件: {}", config_file);
                let mut loaded = Self::load_from_file(config_file)?;
                loaded.apply_env_overrides()?;
                return Ok(loaded);
            }
        }

        // 如果没找到配置文件，创建默认配置
        tracing::warn!("未找到配置文件，创建默认配置: {}", config::DEFAULT_CONFIG_FILE);
        let mut default_config = Self::default();
        default_config.save_to_file(config::DEFAULT_CONFIG_FILE)?;
        default_config.apply_env_overrides()?;
        Ok(default_config)
    }

    /// 从指定文件加载配置
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path)?;
        let config: AppConfig = toml::from_str(&content)?;

        Ok(config)
    }

    /// 保存配置到文件
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = self.to_toml_with_comments()?;
        fs::write(&path, content)?;
        Ok(())
    }

    /// 用环境变量覆盖备份目录和保留数量
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_overrides(
            std::env::var(config::ENV_BACKUP_DIR).ok(),
            std::env::var(config::ENV_MAX_BACKUPS).ok(),
        )
    }

    fn apply_overrides(
        &mut self,
        storage_dir: Option<String>,
        max_backups: Option<String>,
    ) -> Result<()> {
        if let Some(dir) = storage_dir.filter(|d| !d.trim().is_empty()) {
            tracing::debug!("使用环境变量中的备份目录: {}", dir);
            self.backup.storage_dir = dir;
        }

        if let Some(raw) = max_backups {
            self.backup.max_backups = raw.trim().parse::<usize>().map_err(|e| {
                BackupError::custom(format!(
                    "{} 不是有效的数字: {raw} ({e})",
                    config::ENV_MAX_BACKUPS
                ))
            })?;
        }

        Ok(())
    }

    /// 生成带注释的TOML配置
    fn to_toml_with_comments(&self) -> Result<String> {
        const TEMPLATE: &str = include_str!("../templates/config.toml.template");

        let include_files = toml::Value::Array(
            self.backup
                .include_files
                .iter()
                .map(|f| toml::Value::String(f.clone()))
                .collect(),
        );
        let database_kind = match self.database.kind {
            DatabaseKind::DuckDb => "duckdb",
            DatabaseKind::File => "file",
        };
        let day_of_week = self
            .schedule
            .day_of_week
            .map(|d| format!("day_of_week = \"{d}\""))
            .unwrap_or_else(|| "# day_of_week = \"Sun\"".to_string());

        Ok(TEMPLATE
            .replace("{storage_dir}", &toml_string(&self.backup.storage_dir))
            .replace("{max_backups}", &self.backup.max_backups.to_string())
            .replace("{created_by}", &toml_string(&self.backup.created_by))
            .replace("{include_files}", &include_files.to_string())
            .replace("{database_type}", database_kind)
            .replace("{database_path}", &toml_string(&self.database.path))
            .replace("{schedule_enabled}", &self.schedule.enabled.to_string())
            .replace("{schedule_frequency}", self.schedule.frequency.as_str())
            .replace("{schedule_time}", &toml_string(&self.schedule.time))
            .replace("{schedule_day_of_week}", &day_of_week))
    }

    /// 获取备份目录路径
    pub fn get_backup_dir(&self) -> PathBuf {
        PathBuf::from(&self.backup.storage_dir)
    }

    /// 需要脱敏备份的配置文件路径
    pub fn get_include_files(&self) -> Vec<PathBuf> {
        self.backup.include_files.iter().map(PathBuf::from).collect()
    }
}

/// 按 TOML 基本字符串规则转义
fn toml_string(value: &str) -> String {
    toml::Value::String(value.to_string()).to_string()
}
