use backup_core::archive::ArchiveBuilder;
use backup_core::constants::layout;
use backup_core::datasource::{ColumnInfo, DataSource, DuckDbSource, FileCopySource, PortableType};
use backup_core::{ApplyMode, ArtifactFormat, BackupError, BackupService, RestoreStage};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::tempdir;

fn seeded_source() -> Arc<DuckDbSource> {
    let source = DuckDbSource::in_memory().unwrap();
    source
        .execute(
            "CREATE TABLE leads (id INTEGER NOT NULL, phone VARCHAR, qualified BOOLEAN, created_at TIMESTAMP);
             CREATE TABLE messages (lead_id INTEGER, body TEXT);
             INSERT INTO leads VALUES
                (1, '+15550001', true, TIMESTAMP '2026-01-01 09:00:00'),
                (2, '+15550002', false, NULL);
             INSERT INTO messages VALUES (1, 'hi; what''s the price?'), (2, NULL);",
        )
        .unwrap();
    Arc::new(source)
}

fn directory_service(dir: &Path, source: Arc<DuckDbSource>, max: usize) -> BackupService {
    BackupService::builder(dir, source)
        .archive_builder(ArchiveBuilder::directory_only())
        .max_backups(max)
        .build()
}

fn snapshot(source: &DuckDbSource) -> Vec<(String, i64)> {
    source
        .list_tables()
        .unwrap()
        .into_iter()
        .map(|table| {
            let count = source.query_count(&table).unwrap();
            (table, count)
        })
        .collect()
}

async fn ids(service: &BackupService) -> Vec<String> {
    service
        .list_backups()
        .await
        .unwrap()
        .into_iter()
        .map(|m| m.id)
        .collect()
}

#[tokio::test]
async fn create_adds_exactly_one_entry_within_limit() {
    let temp_dir = tempdir().unwrap();
    let service = directory_service(temp_dir.path(), seeded_source(), 3);

    for round in 1..=5 {
        let before = ids(&service).await;
        let created = service.create_backup().await.unwrap();
        let after = ids(&service).await;

        assert!(!before.contains(&created.id));
        assert_eq!(after[0], created.id);
        assert_eq!(after.len(), round.min(3));
        assert!(after.len() <= service.max_backups());
    }
}

#[tokio::test]
async fn retention_keeps_most_recent_two() {
    let temp_dir = tempdir().unwrap();
    let service = directory_service(temp_dir.path(), seeded_source(), 2);

    let a = service.create_backup().await.unwrap();
    let b = service.create_backup().await.unwrap();
    let c = service.create_backup().await.unwrap();

    assert_eq!(ids(&service).await, vec![c.id, b.id]);
    assert!(!temp_dir.path().join(&a.id).exists());
}

#[tokio::test]
async fn retention_with_n_plus_one_backups() {
    let temp_dir = tempdir().unwrap();
    let max = 4;
    let service = directory_service(temp_dir.path(), seeded_source(), max);

    let mut created = Vec::new();
    for _ in 0..=max {
        created.push(service.create_backup().await.unwrap().id);
    }

    let expected: Vec<String> = created.iter().rev().take(max).cloned().collect();
    assert_eq!(ids(&service).await, expected);
}

#[tokio::test]
async fn restore_reports_listable_safety_backup() {
    let temp_dir = tempdir().unwrap();
    let service = directory_service(temp_dir.path(), seeded_source(), 10);

    let original = service.create_backup().await.unwrap();
    let outcome = service.restore_backup(&original.id).await.unwrap();

    assert!(outcome.success);
    assert_eq!(outcome.backup_id, original.id);
    assert_ne!(outcome.safety_backup_id, original.id);
    assert!(ids(&service).await.contains(&outcome.safety_backup_id));
}

#[tokio::test]
async fn restoring_twice_yields_same_state() {
    let temp_dir = tempdir().unwrap();
    let source = seeded_source();
    let service = directory_service(temp_dir.path(), source.clone(), 10);

    let expected = snapshot(&source);
    let backup = service.create_backup().await.unwrap();

    source
        .execute("INSERT INTO leads VALUES (3, '+15550003', NULL, NULL); DELETE FROM messages;")
        .unwrap();
    service.restore_backup(&backup.id).await.unwrap();
    let first = snapshot(&source);

    source.execute("DELETE FROM leads;").unwrap();
    service.restore_backup(&backup.id).await.unwrap();
    let second = snapshot(&source);

    assert_eq!(first, expected);
    assert_eq!(second, expected);
}

#[tokio::test]
async fn safety_backup_does_not_prune_restore_source() {
    let temp_dir = tempdir().unwrap();
    let service = directory_service(temp_dir.path(), seeded_source(), 1);

    let only = service.create_backup().await.unwrap();
    let outcome = service.restore_backup(&only.id).await.unwrap();

    let listed = ids(&service).await;
    assert!(listed.contains(&only.id));
    assert!(listed.contains(&outcome.safety_backup_id));
}

#[tokio::test]
async fn missing_metadata_fails_as_corrupt_without_mutation() {
    let temp_dir = tempdir().unwrap();
    let source = seeded_source();
    let service = directory_service(temp_dir.path(), source.clone(), 10);

    let backup = service.create_backup().await.unwrap();
    fs::remove_file(temp_dir.path().join(&backup.id).join(layout::METADATA_FILE)).unwrap();

    source.execute("DELETE FROM messages;").unwrap();
    let state_before = snapshot(&source);
    let listed_before = ids(&service).await;

    let err = service.restore_backup(&backup.id).await.unwrap_err();
    assert!(err.is_corrupt());
    assert_eq!(err.stage(), Some(RestoreStage::Validating));

    assert_eq!(snapshot(&source), state_before);
    assert_eq!(ids(&service).await, listed_before);
}

#[tokio::test]
async fn transactional_restore_rolls_back_on_bad_statement() {
    let temp_dir = tempdir().unwrap();
    let source = seeded_source();
    let service = directory_service(temp_dir.path(), source.clone(), 10);

    let backup = service.create_backup().await.unwrap();
    let dump = temp_dir.path().join(&backup.id).join(layout::DATABASE_FILE);
    let mut sql = fs::read_to_string(&dump).unwrap();
    sql.push_str("\nINSERT INTO no_such_table VALUES (1);\n");
    fs::write(&dump, sql).unwrap();

    source.execute("DELETE FROM leads;").unwrap();
    let err = service
        .restore_backup_with(&backup.id, ApplyMode::Transactional)
        .await
        .unwrap_err();

    assert_eq!(err.stage(), Some(RestoreStage::Applying));
    assert_eq!(source.query_count("leads").unwrap(), 0);
}

#[tokio::test]
async fn archive_format_round_trip_when_tar_available() {
    let archive = ArchiveBuilder::detect();
    if archive.tar_program().is_none() {
        return;
    }

    let temp_dir = tempdir().unwrap();
    let source = seeded_source();
    let expected = snapshot(&source);
    let service = BackupService::builder(temp_dir.path(), source.clone())
        .archive_builder(archive)
        .build();

    let backup = service.create_backup().await.unwrap();
    assert_eq!(backup.format, ArtifactFormat::Archive);
    assert!(backup.file_name.ends_with(".tar.gz"));

    source.execute("DROP TABLE messages;").unwrap();
    let outcome = service.restore_backup(&backup.id).await.unwrap();
    assert!(outcome.success);
    assert_eq!(snapshot(&source), expected);

    // 解压用的临时目录已清理
    let leftovers = fs::read_dir(temp_dir.path())
        .unwrap()
        .flatten()
        .filter(|e| e.file_name().to_string_lossy().starts_with(".restore-"))
        .count();
    assert_eq!(leftovers, 0);
}

#[tokio::test]
async fn file_backend_copies_raw_data_file() {
    let temp_dir = tempdir().unwrap();
    let db_path = temp_dir.path().join("app.db");
    fs::write(&db_path, b"version-1").unwrap();

    let backups = temp_dir.path().join("backups");
    let service = BackupService::builder(&backups, Arc::new(FileCopySource::new(&db_path)))
        .archive_builder(ArchiveBuilder::directory_only())
        .build();

    let backup = service.create_backup().await.unwrap();
    let dump = fs::read_to_string(backups.join(&backup.id).join(layout::DATABASE_FILE)).unwrap();
    assert!(!dump.contains("INSERT"));

    fs::write(&db_path, b"version-2").unwrap();
    let outcome = service.restore_backup(&backup.id).await.unwrap();
    assert!(outcome.success);
    assert_eq!(fs::read(&db_path).unwrap(), b"version-1");
}

/// 在导出阶段中途出错的数据源
struct BrokenSource {
    fail_listing: bool,
    raw_file: PathBuf,
}

impl DataSource for BrokenSource {
    fn database_type(&self) -> &'static str {
        "broken"
    }

    fn list_tables(&self) -> backup_core::Result<Vec<String>> {
        if self.fail_listing {
            Err(BackupError::custom("连接已断开"))
        } else {
            Ok(Vec::new())
        }
    }

    fn describe_table(&self, _table: &str) -> backup_core::Result<Vec<ColumnInfo>> {
        Ok(Vec::new())
    }

    fn map_type(&self, _column: &ColumnInfo) -> PortableType {
        PortableType::Text
    }

    fn read_rows(
        &self,
        _table: &str,
        _columns: &[ColumnInfo],
    ) -> backup_core::Result<Vec<Vec<Option<String>>>> {
        Ok(Vec::new())
    }

    fn execute(&self, _statement: &str) -> backup_core::Result<()> {
        Ok(())
    }

    fn raw_files(&self) -> Vec<PathBuf> {
        vec![self.raw_file.clone()]
    }
}

fn backup_dir_entries(dir: &Path) -> Vec<String> {
    fs::read_dir(dir)
        .unwrap()
        .flatten()
        .map(|e| e.file_name().to_string_lossy().to_string())
        .collect()
}

#[tokio::test]
async fn failed_export_leaves_no_artifacts() {
    let temp_dir = tempdir().unwrap();
    let source = BrokenSource {
        fail_listing: true,
        raw_file: temp_dir.path().join("unused.db"),
    };
    let backups = temp_dir.path().join("backups");
    let service = BackupService::builder(&backups, Arc::new(source))
        .archive_builder(ArchiveBuilder::detect())
        .build();

    assert!(service.create_backup().await.is_err());
    assert!(backup_dir_entries(&backups).is_empty());
    assert!(service.list_backups().await.unwrap().is_empty());
}

#[tokio::test]
async fn failure_after_partial_staging_leaves_no_artifacts() {
    let temp_dir = tempdir().unwrap();
    // database.sql 已写入工作目录后，拷贝原始文件时失败
    let source = BrokenSource {
        fail_listing: false,
        raw_file: temp_dir.path().join("vanished.db"),
    };
    let backups = temp_dir.path().join("backups");
    let service = BackupService::builder(&backups, Arc::new(source))
        .archive_builder(ArchiveBuilder::detect())
        .build();

    assert!(service.create_backup().await.is_err());

    let leftovers = backup_dir_entries(&backups);
    assert!(leftovers.is_empty(), "残留文件: {leftovers:?}");
    assert!(service.list_backups().await.unwrap().is_empty());
}
