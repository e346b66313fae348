use backup_core::constants::logging;
use tracing_appender::non_blocking::WorkerGuard;

/// # 日志系统
///
/// 库代码只使用 `tracing` 宏，日志配置由 `main.rs` 调用 `setup_logging()` 完成。
///
/// - `-v, --verbose`：DEBUG 级别
/// - `RUST_LOG`：标准的日志级别控制，优先于 `--verbose`
/// - `BACKUP_LOG_FILE`：日志文件路径，设置后日志写入文件而非终端
///
/// ```bash
/// backup-cli list
/// backup-cli -v create
/// BACKUP_LOG_FILE=backup.log backup-cli daemon
/// RUST_LOG=backup_core::scheduler=debug backup-cli daemon
/// ```
///
/// 写文件时返回的 guard 需要保留到进程结束，否则缓冲中的日志会丢失。
pub fn setup_logging(verbose: bool) -> Option<WorkerGuard> {
    use tracing_subscriber::{EnvFilter, fmt};

    let default_level = if verbose {
        "debug"
    } else {
        logging::DEFAULT_LOG_LEVEL
    };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    if let Ok(log_file) = std::env::var(logging::ENV_LOG_FILE) {
        let path = std::path::Path::new(&log_file);
        let directory = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| std::path::Path::new("."));
        let file_name = path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "backup.log".into());

        // 文件输出使用详细格式，便于排查
        let appender = tracing_appender::rolling::never(directory, file_name);
        let (writer, guard) = tracing_appender::non_blocking(appender);

        fmt()
            .with_env_filter(env_filter)
            .with_writer(writer)
            .with_ansi(false)
            .with_target(true)
            .with_thread_names(true)
            .with_line_number(true)
            .init();

        Some(guard)
    } else {
        // 终端输出使用简洁格式
        fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .with_thread_names(false)
            .with_line_number(false)
            .without_time()
            .compact()
            .init();

        None
    }
}

/// 人类可读的文件大小
pub fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.1}GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1}MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1}KB", bytes as f64 / KB as f64)
    } else {
        format!("{bytes}B")
    }
}
