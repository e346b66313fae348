use crate::project_info::{metadata, version_info};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// 定时备份相关命令
#[derive(Subcommand, Debug)]
pub enum ScheduleCommand {
    /// 显示当前定时备份配置
    Show,
    /// 修改定时备份配置，未指定的项保持不变
    Set {
        /// 是否启用定时备份
        #[arg(long, help = "true 启用，false 禁用")]
        enabled: Option<bool>,
        /// 备份频率
        #[arg(long, help = "daily（每天）或 weekly（每周）")]
        frequency: Option<String>,
        /// 备份时间（本地时间）
        #[arg(long, help = "HH:MM，例如 02:00")]
        time: Option<String>,
        /// 每周备份的星期
        #[arg(long, help = "星期，例如 Sun、Mon（weekly 时必填）")]
        day: Option<String>,
    },
}

/// 备份恢复工具 - 数据库与配置文件的快照管理
#[derive(Parser)]
#[command(name = "backup-cli")]
#[command(about = metadata::PROJECT_DESCRIPTION)]
#[command(version = version_info::CLI_VERSION)]
#[command(long_about = metadata::display::DESCRIPTION_LONG)]
#[command(author = metadata::PROJECT_AUTHORS)]
pub struct Cli {
    /// 配置文件路径（不指定时依次查找 config.toml、backup.toml、.backup.toml）
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// 详细输出
    #[arg(short, long)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// 创建默认配置文件和备份目录
    Init {
        /// 如果配置文件已存在，强制覆盖
        #[arg(long)]
        force: bool,
    },
    /// 立即创建一个备份
    Create,
    /// 列出所有备份
    List,
    /// 从备份恢复（恢复前自动创建安全备份）
    Restore {
        /// 备份 ID
        backup_id: String,
        /// 所有语句放在一个事务中执行，任一失败即整体回滚
        #[arg(long)]
        transactional: bool,
    },
    /// 删除备份
    Delete {
        /// 备份 ID
        backup_id: String,
    },
    /// 定时备份管理
    #[command(subcommand)]
    Schedule(ScheduleCommand),
    /// 前台运行定时备份，Ctrl-C 退出
    Daemon,
}
