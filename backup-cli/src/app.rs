use anyhow::Context;
use backup_core::{
    AppConfig, BackupScheduler, BackupService, DataSource, DatabaseKind, DuckDbSource,
    FileCopySource, error::Result,
};
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

use crate::cli::{Commands, ScheduleCommand};
use crate::commands;

#[derive(Clone)]
pub struct CliApp {
    pub config: AppConfig,
    pub service: BackupService,
    pub scheduler: BackupScheduler,
}

impl CliApp {
    /// 加载配置并初始化备份服务
    ///
    /// 指定了配置文件时只读取该文件，否则按默认顺序查找（找不到时写入默认配置）。
    pub fn new(config_path: Option<&Path>) -> anyhow::Result<Self> {
        let config = match config_path {
            Some(path) => {
                let mut config = AppConfig::load_from_file(path)
                    .with_context(|| format!("无法读取配置文件 {}", path.display()))?;
                config
                    .apply_env_overrides()
                    .context("环境变量中的备份配置无效")?;
                config
            }
            None => AppConfig::find_and_load_config().context("加载配置失败")?,
        };

        Self::from_config(config)
    }

    pub fn from_config(config: AppConfig) -> anyhow::Result<Self> {
        let source = open_data_source(&config)
            .with_context(|| format!("无法打开数据源 {}", config.database.path))?;
        debug!(
            "数据源: {} ({})",
            config.database.path,
            source.database_type()
        );

        let service = BackupService::from_config(&config, source);
        let scheduler = BackupScheduler::load(service.clone(), config.schedule.clone())
            .context("加载定时备份配置失败")?;

        Ok(Self {
            config,
            service,
            scheduler,
        })
    }

    /// 运行应用命令
    pub async fn run(&self, command: Commands) -> Result<()> {
        match command {
            // 已经在 main.rs 中处理
            Commands::Init { .. } => Ok(()),
            Commands::Create => commands::run_create(self).await,
            Commands::List => commands::run_list(self).await,
            Commands::Restore {
                backup_id,
                transactional,
            } => commands::run_restore(self, &backup_id, transactional).await,
            Commands::Delete { backup_id } => commands::run_delete(self, &backup_id).await,
            Commands::Schedule(ScheduleCommand::Show) => commands::show_schedule(self).await,
            Commands::Schedule(ScheduleCommand::Set {
                enabled,
                frequency,
                time,
                day,
            }) => commands::set_schedule(self, enabled, frequency, time, day).await,
            Commands::Daemon => commands::run_daemon(self).await,
        }
    }
}

fn open_data_source(config: &AppConfig) -> Result<Arc<dyn DataSource>> {
    let source: Arc<dyn DataSource> = match config.database.kind {
        DatabaseKind::DuckDb => Arc::new(DuckDbSource::open(&config.database.path)?),
        DatabaseKind::File => Arc::new(FileCopySource::new(&config.database.path)),
    };
    Ok(source)
}
