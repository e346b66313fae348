pub mod archive;
pub mod backup;
pub mod catalog;
pub mod config;
pub mod constants;
pub mod datasource;
pub mod error;
pub mod metadata;
pub mod restore;
pub mod retention;
pub mod sanitize;
pub mod scheduler;

pub use archive::ArchiveBuilder;
pub use backup::{BackupService, BackupServiceBuilder};
pub use catalog::BackupCatalog;
pub use config::{AppConfig, DatabaseKind};
pub use datasource::{ApplyMode, DataSource, DuckDbSource, FileCopySource};
pub use error::{BackupError, Result};
pub use metadata::{ArtifactFormat, BackupArtifact, BackupMetadata};
pub use restore::{RestoreOutcome, RestoreStage};
pub use retention::RetentionManager;
pub use scheduler::{BackupScheduler, Frequency, ScheduleConfig, TickOutcome};
