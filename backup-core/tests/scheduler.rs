use backup_core::archive::ArchiveBuilder;
use backup_core::datasource::DuckDbSource;
use backup_core::{BackupScheduler, BackupService, ScheduleConfig, TickOutcome};
use chrono::{Duration, TimeZone, Utc};
use std::sync::Arc;
use tempfile::tempdir;

fn service(dir: &std::path::Path) -> BackupService {
    BackupService::builder(dir, Arc::new(DuckDbSource::in_memory().unwrap()))
        .archive_builder(ArchiveBuilder::directory_only())
        .build()
}

#[tokio::test]
async fn daily_schedule_triggers_once_at_two_am() {
    let temp_dir = tempdir().unwrap();
    let service = service(temp_dir.path());
    let scheduler = BackupScheduler::new(service.clone(), ScheduleConfig::daily("02:00"));

    // 模拟时钟从 01:58 走到 02:02
    let start = Utc.with_ymd_and_hms(2026, 6, 10, 1, 58, 0).unwrap();
    let mut triggered = 0;
    for minute in 0..5 {
        let outcome = scheduler.tick(start + Duration::minutes(minute)).await.unwrap();
        if matches!(outcome, TickOutcome::Triggered(_)) {
            triggered += 1;
        }
    }

    assert_eq!(triggered, 1);
    assert_eq!(service.list_backups().await.unwrap().len(), 1);
}

#[tokio::test]
async fn reaching_two_am_twice_within_cooldown_triggers_once() {
    let temp_dir = tempdir().unwrap();
    let service = service(temp_dir.path());
    let scheduler = BackupScheduler::new(service.clone(), ScheduleConfig::daily("02:00"));

    let at = Utc.with_ymd_and_hms(2026, 6, 10, 2, 0, 0).unwrap();
    assert!(matches!(
        scheduler.tick(at).await.unwrap(),
        TickOutcome::Triggered(_)
    ));

    // 同一分钟内的第二次检查
    let again = at + Duration::seconds(45);
    let outcome = scheduler.tick(again).await.unwrap();
    assert!(!matches!(outcome, TickOutcome::Triggered(_)));

    assert_eq!(service.list_backups().await.unwrap().len(), 1);
}

#[tokio::test]
async fn scheduler_skips_while_manual_operation_runs() {
    let temp_dir = tempdir().unwrap();
    let service = service(temp_dir.path());
    let scheduler = BackupScheduler::new(service.clone(), ScheduleConfig::daily("02:00"));

    // 手动备份与定时触发同时发生时，只会串行执行，不会重叠
    let at = Utc.with_ymd_and_hms(2026, 6, 10, 2, 0, 0).unwrap();
    let (manual, scheduled) = tokio::join!(service.create_backup(), scheduler.tick(at));

    manual.unwrap();
    let scheduled = scheduled.unwrap();
    let expected = match scheduled {
        TickOutcome::Triggered(_) => 2,
        TickOutcome::Busy => 1,
        other => panic!("unexpected outcome: {other:?}"),
    };
    assert_eq!(service.list_backups().await.unwrap().len(), expected);
}
