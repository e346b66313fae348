use crate::app::CliApp;
use crate::project_info::metadata;
use backup_core::{BackupError, Frequency, ScheduleConfig, error::Result};
use chrono::Weekday;
use tracing::{debug, info, instrument};

/// 显示定时备份配置
#[instrument(skip(app))]
pub async fn show_schedule(app: &CliApp) -> Result<()> {
    let schedule = app.scheduler.get_schedule().await;

    info!("⏰ 定时备份配置");
    info!(
        enabled = schedule.enabled,
        frequency = schedule.frequency.as_str(),
        time = %schedule.time,
        day_of_week = ?schedule.day_of_week,
        "定时备份配置信息"
    );
    if !schedule.enabled {
        info!("💡 启用定时备份: backup-cli schedule set --enabled true");
    }
    Ok(())
}

/// 修改定时备份配置
#[instrument(skip(app))]
pub async fn set_schedule(
    app: &CliApp,
    enabled: Option<bool>,
    frequency: Option<String>,
    time: Option<String>,
    day: Option<String>,
) -> Result<()> {
    let current = app.scheduler.get_schedule().await;
    let updated = merge_schedule(current, enabled, frequency, time, day)?;
    debug!("新的定时配置: {:?}", updated);

    app.scheduler.update_schedule(updated).await?;
    info!("✅ 定时备份配置已保存");
    show_schedule(app).await
}

fn merge_schedule(
    mut schedule: ScheduleConfig,
    enabled: Option<bool>,
    frequency: Option<String>,
    time: Option<String>,
    day: Option<String>,
) -> Result<ScheduleConfig> {
    if let Some(enabled) = enabled {
        schedule.enabled = enabled;
    }
    if let Some(frequency) = frequency {
        schedule.frequency = frequency.parse::<Frequency>()?;
    }
    if let Some(time) = time {
        schedule.time = time;
    }
    if let Some(day) = day {
        let weekday = day
            .parse::<Weekday>()
            .map_err(|_| BackupError::InvalidSchedule(format!("无法识别的星期: {day}")))?;
        schedule.day_of_week = Some(weekday);
    }
    if schedule.frequency == Frequency::Daily {
        schedule.day_of_week = None;
    }

    schedule.validate()?;
    Ok(schedule)
}

/// 前台运行定时备份，直到收到 Ctrl-C
#[instrument(skip(app))]
pub async fn run_daemon(app: &CliApp) -> Result<()> {
    let schedule = app.scheduler.get_schedule().await;
    if !schedule.enabled {
        info!("⚠️  定时备份未启用，调度器将空转直到配置被启用");
    }

    info!("🚀 {} 定时备份已启动，按 Ctrl-C 退出", metadata::PROJECT_NAME);
    app.scheduler.start().await;

    tokio::signal::ctrl_c().await?;
    info!("收到退出信号，正在停止...");

    app.scheduler.stop().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_keeps_unspecified_fields() {
        let merged = merge_schedule(
            ScheduleConfig::daily("02:00"),
            None,
            None,
            Some("03:15".to_string()),
            None,
        )
        .unwrap();

        assert!(merged.enabled);
        assert_eq!(merged.frequency, Frequency::Daily);
        assert_eq!(merged.time, "03:15");
    }

    #[test]
    fn test_merge_weekly_requires_day() {
        let base = ScheduleConfig::default();
        assert!(merge_schedule(base.clone(), Some(true), Some("weekly".into()), None, None).is_err());

        let weekly = merge_schedule(
            base,
            Some(true),
            Some("weekly".into()),
            None,
            Some("sunday".into()),
        )
        .unwrap();
        assert_eq!(weekly.day_of_week, Some(Weekday::Sun));
    }

    #[test]
    fn test_merge_rejects_bad_input() {
        let base = ScheduleConfig::default();
        assert!(merge_schedule(base.clone(), None, Some("hourly".into()), None, None).is_err());
        assert!(merge_schedule(base.clone(), None, None, Some("25:00".into()), None).is_err());
        assert!(merge_schedule(base, None, Some("weekly".into()), None, Some("someday".into())).is_err());
    }
}
