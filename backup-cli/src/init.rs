use backup_core::{AppConfig, constants::config, error::Result};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// 创建默认配置文件和备份目录
pub async fn run_init(config_path: Option<&Path>, force: bool) -> Result<()> {
    let config_path = config_path
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from(config::DEFAULT_CONFIG_FILE));

    info!("📋 初始化备份配置");

    if config_path.exists() && !force {
        warn!("⚠️  配置文件已存在: {}", config_path.display());
        info!("如果您要重新初始化，请使用 --force 参数");
        info!("示例: backup-cli init --force");
        return Ok(());
    }

    let mut config = AppConfig::default();
    config.save_to_file(&config_path)?;
    info!("   ✅ 创建配置文件: {}", config_path.display());

    // 目录按环境变量覆盖后的位置创建，但配置文件里保留默认值
    config.apply_env_overrides()?;
    std::fs::create_dir_all(config.get_backup_dir())?;
    info!("   ✅ 创建备份目录: {}", config.backup.storage_dir);

    info!("💡 下一步:");
    info!("   1. 编辑 {} 中的 [database] 指向要备份的数据库", config_path.display());
    info!("   2. 运行 backup-cli create 创建第一个备份");
    Ok(())
}
