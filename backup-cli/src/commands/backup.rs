use crate::app::CliApp;
use crate::utils::format_size;
use backup_core::{ApplyMode, BackupError, error::Result};
use tracing::{info, instrument, warn};

/// 创建备份
#[instrument(skip(app))]
pub async fn run_create(app: &CliApp) -> Result<()> {
    info!("💾 创建备份");
    info!("===========");

    let metadata = app.service.create_backup().await?;

    info!("✅ 备份创建成功");
    info!("   ID:   {}", metadata.id);
    info!("   格式: {}", metadata.format);
    info!("   大小: {}", format_size(metadata.file_size));
    info!("   位置: {}", metadata.file_path.display());

    if !metadata.warnings.is_empty() {
        warn!("⚠️  以下表未能导出，备份中不包含它们:");
        for warning in &metadata.warnings {
            warn!("   - {}: {}", warning.table, warning.reason);
        }
    }

    Ok(())
}

/// 列出所有备份
#[instrument(skip(app))]
pub async fn run_list(app: &CliApp) -> Result<()> {
    let backups = app.service.list_backups().await?;

    if backups.is_empty() {
        info!("📦 暂无备份记录");
        info!("💡 使用以下命令创建备份:");
        info!("   backup-cli create");
        return Ok(());
    }

    info!("📦 备份列表（{}）", app.service.backup_dir().display());
    info!("============");
    info!(
        "{:<32} {:<20} {:<10} {:<10} {:<10}",
        "ID", "创建时间", "格式", "大小", "数据库"
    );
    info!("{}", "-".repeat(90));

    let mut total_size = 0u64;
    for backup in &backups {
        total_size += backup.file_size;
        let database_type = backup
            .embedded
            .as_ref()
            .map(|e| e.database_type.as_str())
            .unwrap_or("未知");

        info!(
            "{:<32} {:<20} {:<10} {:<10} {:<10}",
            backup.id,
            backup
                .created_at
                .with_timezone(&chrono::Local)
                .format("%Y-%m-%d %H:%M:%S")
                .to_string(),
            backup.format.to_string(),
            format_size(backup.file_size),
            database_type
        );
    }

    info!("{}", "-".repeat(90));
    info!(
        "共 {} 个备份，总大小 {}（最多保留 {} 个）",
        backups.len(),
        format_size(total_size),
        app.service.max_backups()
    );

    Ok(())
}

/// 从备份恢复
#[instrument(skip(app))]
pub async fn run_restore(app: &CliApp, backup_id: &str, transactional: bool) -> Result<()> {
    let mode = if transactional {
        ApplyMode::Transactional
    } else {
        ApplyMode::BestEffort
    };

    info!("🔄 从备份恢复: {}", backup_id);
    info!("   恢复前会自动创建安全备份");

    let outcome = app.service.restore_backup_with(backup_id, mode).await?;

    info!("   已恢复备份: {}", outcome.backup_id);
    info!("   安全备份:   {}", outcome.safety_backup_id);
    info!("   执行语句:   {} 条", outcome.statements_applied);
    info!("💡 如需撤销本次恢复: backup-cli restore {}", outcome.safety_backup_id);

    if outcome.success {
        info!("✅ 恢复完成");
        return Ok(());
    }

    warn!("⚠️  {} 条语句执行失败:", outcome.failed_statements.len());
    for failure in &outcome.failed_statements {
        warn!("   #{} {} -> {}", failure.index, failure.statement, failure.reason);
    }
    Err(BackupError::custom(format!(
        "恢复未完全成功，{} 条语句失败",
        outcome.failed_statements.len()
    )))
}

/// 删除备份
#[instrument(skip(app))]
pub async fn run_delete(app: &CliApp, backup_id: &str) -> Result<()> {
    app.service.delete_backup(backup_id).await?;
    info!("🗑️  已删除备份: {}", backup_id);
    Ok(())
}
