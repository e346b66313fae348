use backup_cli::{Cli, CliApp, Commands, run_init, setup_logging};
use clap::Parser;
use tracing::error;

#[tokio::main]
async fn main() {
    // 解析命令行参数
    let cli = Cli::parse();

    // 设置日志记录，文件日志的 guard 在退出前释放以刷新缓冲
    let log_guard = setup_logging(cli.verbose);

    let code = run(cli).await;

    drop(log_guard);
    std::process::exit(code);
}

async fn run(cli: Cli) -> i32 {
    // `init` 命令不需要预先加载配置
    if let Commands::Init { force } = cli.command {
        if let Err(e) = run_init(cli.config.as_deref(), force).await {
            error!("❌ 初始化失败: {}", e);
            return 1;
        }
        return 0;
    }

    let app = match CliApp::new(cli.config.as_deref()) {
        Ok(app) => app,
        Err(e) => {
            error!("❌ 应用初始化失败: {:#}", e);
            if let Some(path) = cli.config.as_deref().filter(|p| !p.exists()) {
                error!("👉 配置文件 '{}' 不存在，请先运行 'backup-cli init'", path.display());
            }
            return 1;
        }
    };

    if let Err(e) = app.run(cli.command).await {
        error!("❌ 操作失败: {}", e);
        return 1;
    }
    0
}
