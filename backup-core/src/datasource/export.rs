use super::{ColumnInfo, DataSource, PortableType};
use crate::Result;
use crate::constants::layout;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use tracing::{debug, info, warn};

/// 单表导出失败的记录，不影响其他表
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportWarning {
    pub table: String,
    pub reason: String,
}

/// 导出结果
#[derive(Debug, Clone)]
pub struct SqlExport {
    pub sql: String,
    /// 成功导出的表
    pub tables: Vec<String>,
    pub warnings: Vec<ExportWarning>,
    /// 导出的总行数
    pub row_count: usize,
}

/// 把数据源的全部基础表导出为可移植 SQL
///
/// 单表失败只记录警告并跳过；只有列出表清单失败才会让整个导出失败。
pub fn export_sql(source: &dyn DataSource) -> Result<SqlExport> {
    let mut sql = String::new();
    let _ = writeln!(sql, "-- Database export");
    let _ = writeln!(sql, "-- database_type: {}", source.database_type());
    let _ = writeln!(sql, "-- generated_at: {}", Utc::now().to_rfc3339());
    sql.push('\n');

    if !source.supports_introspection() {
        info!(
            "数据源 {} 不支持 SQL 内省，导出占位说明，以文件拷贝为准",
            source.database_type()
        );
        let _ = writeln!(
            sql,
            "-- This backend has no SQL-level introspection; no statements were exported."
        );
        let _ = writeln!(
            sql,
            "-- The authoritative backup is the direct file copy under {}/{}/.",
            layout::FILES_DIR,
            layout::RAW_DATABASE_DIR
        );
        return Ok(SqlExport {
            sql,
            tables: Vec::new(),
            warnings: Vec::new(),
            row_count: 0,
        });
    }

    let table_names = source.list_tables()?;
    debug!("待导出的表: {:?}", table_names);

    let mut tables = Vec::new();
    let mut warnings = Vec::new();
    let mut row_count = 0;

    for table in table_names {
        match export_table(source, &table) {
            Ok((table_sql, rows)) => {
                sql.push_str(&table_sql);
                sql.push('\n');
                row_count += rows;
                debug!("表 {} 导出完成，共 {} 行", table, rows);
                tables.push(table);
            }
            Err(e) => {
                warn!("表 {} 导出失败，已跳过: {}", table, e);
                warnings.push(ExportWarning {
                    table,
                    reason: e.to_string(),
                });
            }
        }
    }

    info!(
        "数据库导出完成: {} 张表, {} 行, {} 个警告",
        tables.len(),
        row_count,
        warnings.len()
    );

    Ok(SqlExport {
        sql,
        tables,
        warnings,
        row_count,
    })
}

/// 导出单张表，整张表成功才返回文本，避免半截语句混进导出
fn export_table(source: &dyn DataSource, table: &str) -> Result<(String, usize)> {
    let columns = source.describe_table(table)?;
    let types: Vec<PortableType> = columns.iter().map(|c| source.map_type(c)).collect();
    let rows = source.read_rows(table, &columns)?;

    let mut out = String::new();
    let ident = quote_ident(table);

    let _ = writeln!(out, "-- Table: {table}");
    let _ = writeln!(out, "DROP TABLE IF EXISTS {ident} CASCADE;");
    let _ = writeln!(out, "{}", create_table_sql(&ident, &columns, &types));

    let column_list = columns
        .iter()
        .map(|c| quote_ident(&c.name))
        .collect::<Vec<_>>()
        .join(", ");

    for row in &rows {
        let values = row
            .iter()
            .zip(types.iter())
            .map(|(value, ty)| render_value(value.as_deref(), ty))
            .collect::<Vec<_>>()
            .join(", ");
        let _ = writeln!(out, "INSERT INTO {ident} ({column_list}) VALUES ({values});");
    }

    Ok((out, rows.len()))
}

fn create_table_sql(ident: &str, columns: &[ColumnInfo], types: &[PortableType]) -> String {
    let definitions = columns
        .iter()
        .zip(types.iter())
        .map(|(column, ty)| {
            let mut def = format!("    {} {}", quote_ident(&column.name), ty.sql_name());
            if !column.nullable {
                def.push_str(" NOT NULL");
            }
            if let Some(default) = column.default.as_deref() {
                // 序列不在导出范围内，引用序列的默认值会让建表失败
                if !default.to_ascii_lowercase().contains("nextval(") {
                    def.push_str(" DEFAULT ");
                    def.push_str(default);
                }
            }
            def
        })
        .collect::<Vec<_>>()
        .join(",\n");

    format!("CREATE TABLE {ident} (\n{definitions}\n);")
}

/// 标识符加双引号
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// 字符串字面量加单引号并转义
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// 按可移植类型渲染 INSERT 中的一个值
pub fn render_value(value: Option<&str>, ty: &PortableType) -> String {
    let Some(raw) = value else {
        return "NULL".to_string();
    };

    match ty {
        PortableType::Boolean => match raw.trim().to_ascii_lowercase().as_str() {
            "true" | "t" | "1" | "yes" | "y" => "TRUE".to_string(),
            _ => "FALSE".to_string(),
        },
        ty if ty.is_numeric() => {
            if is_numeric_literal(raw) {
                raw.trim().to_string()
            } else {
                quote_literal(raw)
            }
        }
        PortableType::Timestamp => quote_literal(&to_iso8601(raw)),
        _ => quote_literal(raw),
    }
}

fn is_numeric_literal(raw: &str) -> bool {
    let trimmed = raw.trim();
    !trimmed.is_empty()
        && trimmed
            .chars()
            .all(|c| c.is_ascii_digit() || matches!(c, '.' | '-' | '+' | 'e' | 'E'))
        && trimmed.parse::<f64>().map(|v| v.is_finite()).unwrap_or(false)
}

/// 后端的时间文本统一转成 ISO-8601，无法识别时原样保留
fn to_iso8601(raw: &str) -> String {
    let trimmed = raw.trim();

    if let Ok(dt) = DateTime::parse_from_str(trimmed, "%Y-%m-%d %H:%M:%S%.f%#z") {
        return dt.to_rfc3339();
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return dt.to_rfc3339();
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%d %H:%M:%S%.f") {
        return dt.format("%Y-%m-%dT%H:%M:%S%.f").to_string();
    }
    if let Ok(date) = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d") {
        return date.format("%Y-%m-%d").to_string();
    }

    trimmed.to_string()
}
