// 数据源模块
//
// 备份只关心“能否把关系型状态导出为可移植的 SQL 语句、能否再导回去”。
// 每种后端实现一次 DataSource 能力接口（表内省、行读取、类型映射、语句执行），
// 导出/导入的公共流程在 export / import 中基于该接口实现，不在流程里按后端分支。
//
// 主要组件：
// - DataSource: 后端能力接口
// - DuckDbSource: DuckDB 后端，通过 information_schema 内省
// - FileCopySource: 无 SQL 内省能力的单文件后端，只做原始文件拷贝
// - export_sql / import_sql: 公共导出与导入流程

mod duckdb_source;
mod export;
mod file_copy;
mod import;

use crate::Result;
use std::path::{Path, PathBuf};

pub use duckdb_source::DuckDbSource;
pub use export::{ExportWarning, SqlExport, export_sql, quote_ident, quote_literal, render_value};
pub use file_copy::FileCopySource;
pub use import::{ApplyMode, ImportReport, StatementFailure, import_sql, split_statements};

/// 列元数据
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnInfo {
    pub name: String,
    /// 后端原生类型名
    pub data_type: String,
    pub char_max_length: Option<u32>,
    pub numeric_precision: Option<u32>,
    pub numeric_scale: Option<u32>,
    pub nullable: bool,
    pub default: Option<String>,
}

impl ColumnInfo {
    pub fn new(name: impl Into<String>, data_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
            char_max_length: None,
            numeric_precision: None,
            numeric_scale: None,
            nullable: true,
            default: None,
        }
    }
}

/// 可移植类型词汇，导出的 CREATE TABLE 只使用这些类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortableType {
    Varchar(u32),
    Integer,
    BigInt,
    Boolean,
    Numeric(Option<(u32, u32)>),
    /// 二进制浮点，按 DOUBLE 保存以免精度被截断
    Double,
    Text,
    Timestamp,
    Json,
}

impl PortableType {
    /// 在 DDL 中使用的类型名
    pub fn sql_name(&self) -> String {
        match self {
            PortableType::Varchar(len) => format!("VARCHAR({len})"),
            PortableType::Integer => "INTEGER".to_string(),
            PortableType::BigInt => "BIGINT".to_string(),
            PortableType::Boolean => "BOOLEAN".to_string(),
            PortableType::Numeric(Some((precision, scale))) => {
                format!("NUMERIC({precision},{scale})")
            }
            PortableType::Numeric(None) => "NUMERIC".to_string(),
            PortableType::Double => "DOUBLE".to_string(),
            PortableType::Text => "TEXT".to_string(),
            PortableType::Timestamp => "TIMESTAMP".to_string(),
            PortableType::Json => "JSON".to_string(),
        }
    }

    /// 数值类型的值在 INSERT 中不加引号
    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            PortableType::Integer
                | PortableType::BigInt
                | PortableType::Numeric(_)
                | PortableType::Double
        )
    }
}

/// 数据源后端能力接口
///
/// 所有方法都是阻塞调用，调用方负责放到 `spawn_blocking` 中执行。
pub trait DataSource: Send + Sync {
    /// 写入 metadata.json 的数据库类型
    fn database_type(&self) -> &'static str;

    /// 是否支持 SQL 层面的表内省；不支持时导出降级为占位说明 + 原始文件拷贝
    fn supports_introspection(&self) -> bool {
        true
    }

    /// 当前 schema 下的所有基础表
    fn list_tables(&self) -> Result<Vec<String>>;

    /// 表的列元数据，按定义顺序
    fn describe_table(&self, table: &str) -> Result<Vec<ColumnInfo>>;

    /// 把后端原生类型翻译成可移植类型
    fn map_type(&self, column: &ColumnInfo) -> PortableType;

    /// 读取整表数据，每个值以文本形式返回，NULL 为 None
    fn read_rows(&self, table: &str, columns: &[ColumnInfo]) -> Result<Vec<Vec<Option<String>>>>;

    /// 执行一条不返回结果的语句
    fn execute(&self, statement: &str) -> Result<()>;

    /// 需要原样拷贝进备份的数据文件
    fn raw_files(&self) -> Vec<PathBuf> {
        Vec::new()
    }

    /// 用备份中的原始数据文件覆盖当前文件，返回覆盖的文件数
    fn restore_raw_files(&self, _dir: &Path) -> Result<usize> {
        Ok(0)
    }
}
