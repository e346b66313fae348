/// 备份存储相关常量
pub mod backup {
    use std::path::{Path, PathBuf};

    /// 备份目录名
    pub const BACKUP_DIR_NAME: &str = "backups";

    /// 备份ID前缀
    pub const BACKUP_PREFIX: &str = "backup-";

    /// 压缩归档扩展名
    pub const ARCHIVE_EXTENSION: &str = ".tar.gz";

    /// 备份ID中的时间格式（UTC，按字典序即按时间排序）
    pub const ID_TIME_FORMAT: &str = "%Y%m%d-%H%M%S-%3f";

    /// 临时工作目录前缀，目录列表时会被忽略
    pub const STAGING_PREFIX: &str = ".staging-";

    /// 临时解压目录前缀
    pub const EXTRACT_PREFIX: &str = ".restore-";

    /// 默认保留的备份数量
    pub const DEFAULT_MAX_BACKUPS: usize = 10;

    /// 默认的创建者标识
    pub const DEFAULT_CREATED_BY: &str = "system";

    /// 获取默认备份存储目录（跨平台）
    pub fn get_default_storage_dir() -> PathBuf {
        Path::new(".").join(BACKUP_DIR_NAME)
    }
}

/// 备份内部文件布局
pub mod layout {
    /// 元数据描述文件
    pub const METADATA_FILE: &str = "metadata.json";

    /// 数据库导出文件
    pub const DATABASE_FILE: &str = "database.sql";

    /// 脱敏后的配置文件目录
    pub const FILES_DIR: &str = "files";

    /// 无 SQL 内省能力的后端，原始数据文件放在 files/ 下的这个子目录
    pub const RAW_DATABASE_DIR: &str = "database";

    /// 目录格式备份的标记文件
    pub const FORMAT_MARKER_FILE: &str = ".backup-format";

    /// 元数据格式版本
    pub const DESCRIPTOR_VERSION: &str = "1.0";
}

/// 配置脱敏相关常量
pub mod sanitize {
    /// 替换敏感值的固定标记
    pub const REDACTED_MARKER: &str = "***REDACTED***";

    /// 键名包含这些子串（不区分大小写）即视为敏感
    pub const SENSITIVE_KEY_PATTERNS: [&str; 5] = ["password", "secret", "key", "token", "auth"];
}

/// 定时备份相关常量
pub mod schedule {
    /// 调度器轮询周期（秒）
    pub const TICK_INTERVAL_SECS: u64 = 60;

    /// 一次备份完成后的冷却时间（秒）
    pub const DEFAULT_COOLDOWN_SECS: i64 = 300;

    /// 定时配置持久化文件，位于备份目录下
    pub const SCHEDULE_FILE: &str = "schedule.json";

    /// 默认备份时间
    pub const DEFAULT_TIME: &str = "02:00";
}

/// 配置文件相关常量
pub mod config {
    /// 配置文件查找顺序
    pub const CONFIG_FILE_CANDIDATES: [&str; 3] = ["config.toml", "backup.toml", ".backup.toml"];

    /// 默认配置文件名
    pub const DEFAULT_CONFIG_FILE: &str = "config.toml";

    /// 备份目录环境变量
    pub const ENV_BACKUP_DIR: &str = "BACKUP_DIR";

    /// 最大保留数量环境变量
    pub const ENV_MAX_BACKUPS: &str = "MAX_BACKUPS";

    /// 默认数据库文件
    pub const DEFAULT_DATABASE_PATH: &str = "./data/app.duckdb";
}

/// 日志相关常量
pub mod logging {
    /// 默认日志级别
    pub const DEFAULT_LOG_LEVEL: &str = "info";

    /// 日志文件路径环境变量
    pub const ENV_LOG_FILE: &str = "BACKUP_LOG_FILE";
}
