use super::DataSource;
use crate::{BackupError, Result};
use tracing::{debug, info, warn};

/// 恢复时语句的执行方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ApplyMode {
    /// 逐条执行，失败的语句记录后跳过，尽可能多地恢复
    #[default]
    BestEffort,
    /// 整体放进一个事务，任一语句失败即回滚
    Transactional,
}

/// 单条语句执行失败的记录
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatementFailure {
    /// 语句在导出流中的序号（从 0 开始）
    pub index: usize,
    /// 语句开头部分，便于定位
    pub statement: String,
    pub reason: String,
}

/// 导入结果
#[derive(Debug, Clone, Default)]
pub struct ImportReport {
    pub applied: usize,
    pub failed: Vec<StatementFailure>,
}

const STATEMENT_PREVIEW_CHARS: usize = 120;

/// 按分号切分语句流
///
/// 单引号字符串和双引号标识符内的分号不切分，`--` 注释被丢弃。
pub fn split_statements(sql: &str) -> Vec<String> {
    let mut statements = Vec::new();
    let mut current = String::new();
    let mut chars = sql.chars().peekable();
    let mut in_string = false;
    let mut in_ident = false;

    while let Some(c) = chars.next() {
        match c {
            '\'' if !in_ident => {
                in_string = !in_string;
                current.push(c);
            }
            '"' if !in_string => {
                in_ident = !in_ident;
                current.push(c);
            }
            '-' if !in_string && !in_ident && chars.peek() == Some(&'-') => {
                // 跳过到行尾
                for next in chars.by_ref() {
                    if next == '\n' {
                        current.push('\n');
                        break;
                    }
                }
            }
            ';' if !in_string && !in_ident => {
                let statement = current.trim();
                if !statement.is_empty() {
                    statements.push(statement.to_string());
                }
                current.clear();
            }
            _ => current.push(c),
        }
    }

    let tail = current.trim();
    if !tail.is_empty() {
        statements.push(tail.to_string());
    }

    statements
}

/// 把导出的 SQL 导入数据源
pub fn import_sql(source: &dyn DataSource, sql: &str, mode: ApplyMode) -> Result<ImportReport> {
    let statements = split_statements(sql);
    info!(
        "开始导入 {} 条语句 (模式: {:?})",
        statements.len(),
        mode
    );

    match mode {
        ApplyMode::BestEffort => Ok(apply_best_effort(source, &statements)),
        ApplyMode::Transactional => apply_transactional(source, &statements),
    }
}

fn apply_best_effort(source: &dyn DataSource, statements: &[String]) -> ImportReport {
    let mut report = ImportReport::default();

    for (index, statement) in statements.iter().enumerate() {
        match source.execute(statement) {
            Ok(()) => report.applied += 1,
            Err(e) => {
                warn!("第 {} 条语句执行失败，继续执行后续语句: {}", index, e);
                report.failed.push(StatementFailure {
                    index,
                    statement: preview(statement),
                    reason: e.to_string(),
                });
            }
        }
    }

    info!(
        "导入完成: 成功 {} 条, 失败 {} 条",
        report.applied,
        report.failed.len()
    );
    report
}

fn apply_transactional(source: &dyn DataSource, statements: &[String]) -> Result<ImportReport> {
    source.execute("BEGIN TRANSACTION")?;

    for (index, statement) in statements.iter().enumerate() {
        if let Err(e) = source.execute(statement) {
            warn!("第 {} 条语句执行失败，回滚整个导入: {}", index, e);
            if let Err(rollback_err) = source.execute("ROLLBACK") {
                warn!("回滚失败: {}", rollback_err);
            }
            return Err(BackupError::custom(format!(
                "事务导入在第 {index} 条语句失败并已回滚: {e} ({})",
                preview(statement)
            )));
        }
    }

    source.execute("COMMIT")?;
    debug!("事务导入已提交");

    Ok(ImportReport {
        applied: statements.len(),
        failed: Vec::new(),
    })
}

fn preview(statement: &str) -> String {
    let mut out: String = statement.chars().take(STATEMENT_PREVIEW_CHARS).collect();
    if statement.chars().count() > STATEMENT_PREVIEW_CHARS {
        out.push_str("...");
    }
    out
}
