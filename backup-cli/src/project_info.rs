/// 项目元数据（从 Cargo.toml 同步）
pub mod metadata {
    pub const PROJECT_NAME: &str = env!("CARGO_PKG_NAME");

    pub const PROJECT_DESCRIPTION: &str = env!("CARGO_PKG_DESCRIPTION");

    pub const PROJECT_AUTHORS: &str = env!("CARGO_PKG_AUTHORS");

    pub mod display {
        /// 比 Cargo.toml 中更详细的描述
        pub const DESCRIPTION_LONG: &str = "导出数据库与配置文件的时间点快照，保存为可检索的归档；\
恢复前总会自动创建安全备份，并支持每日/每周定时备份";
    }
}

/// 版本信息
pub mod version_info {
    pub const CLI_VERSION: &str = env!("CARGO_PKG_VERSION");
}
