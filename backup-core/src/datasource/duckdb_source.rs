use super::{ColumnInfo, DataSource, PortableType, quote_ident};
use crate::{BackupError, Result};
use duckdb::{Connection, params};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tracing::debug;

/// DuckDB 数据源
///
/// DuckDB 连接不能跨线程共享，这里用单一连接 + Mutex 串行化所有访问，
/// 文件库和内存库走同一套逻辑。
pub struct DuckDbSource {
    connection: Mutex<Connection>,
    db_path: Option<PathBuf>,
    schema: String,
}

impl DuckDbSource {
    /// 打开（或创建）文件数据库
    pub fn open<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let db_path = db_path.as_ref().to_path_buf();

        // 确保数据库文件的父目录存在
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let connection = Connection::open(&db_path)?;
        debug!("DuckDB 数据源已打开: {}", db_path.display());

        Ok(Self {
            connection: Mutex::new(connection),
            db_path: Some(db_path),
            schema: "main".to_string(),
        })
    }

    /// 创建内存数据库（主要用于测试）
    pub fn in_memory() -> Result<Self> {
        Ok(Self::from_connection(Connection::open_in_memory()?))
    }

    /// 包装调用方已有的连接
    pub fn from_connection(connection: Connection) -> Self {
        Self {
            connection: Mutex::new(connection),
            db_path: None,
            schema: "main".to_string(),
        }
    }

    /// 指定导出的 schema，默认 main
    pub fn with_schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = schema.into();
        self
    }

    /// 数据库文件路径，内存库为 None
    pub fn db_path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.connection
            .lock()
            .map_err(|_| BackupError::custom("DuckDB 连接锁已损坏"))
    }

    /// 单值查询，测试和调用方做数据校验时使用
    pub fn query_count(&self, table: &str) -> Result<i64> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT COUNT(*) FROM {}.{}",
            quote_ident(&self.schema),
            quote_ident(table)
        );
        let count: i64 = conn.query_row(&sql, [], |row| row.get(0))?;
        Ok(count)
    }
}

impl DataSource for DuckDbSource {
    fn database_type(&self) -> &'static str {
        "duckdb"
    }

    fn list_tables(&self) -> Result<Vec<String>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT table_name FROM information_schema.tables
             WHERE table_schema = ? AND table_catalog = current_database()
               AND table_type = 'BASE TABLE'
             ORDER BY table_name",
        )?;

        let table_iter = stmt.query_map(params![self.schema], |row| row.get::<_, String>(0))?;

        let mut tables = Vec::new();
        for table in table_iter {
            tables.push(table?);
        }

        Ok(tables)
    }

    fn describe_table(&self, table: &str) -> Result<Vec<ColumnInfo>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT column_name, data_type, character_maximum_length,
                    numeric_precision, numeric_scale, is_nullable, column_default
             FROM information_schema.columns
             WHERE table_schema = ? AND table_name = ? AND table_catalog = current_database()
             ORDER BY ordinal_position",
        )?;

        let column_iter = stmt.query_map(params![self.schema, table], |row| {
            let char_max_length: Option<i64> = row.get(2)?;
            let numeric_precision: Option<i64> = row.get(3)?;
            let numeric_scale: Option<i64> = row.get(4)?;
            let is_nullable: String = row.get(5)?;

            Ok(ColumnInfo {
                name: row.get(0)?,
                data_type: row.get(1)?,
                char_max_length: char_max_length.and_then(|v| u32::try_from(v).ok()),
                numeric_precision: numeric_precision.and_then(|v| u32::try_from(v).ok()),
                numeric_scale: numeric_scale.and_then(|v| u32::try_from(v).ok()),
                nullable: is_nullable.eq_ignore_ascii_case("YES"),
                default: row.get(6)?,
            })
        })?;

        let mut columns = Vec::new();
        for column in column_iter {
            columns.push(column?);
        }

        if columns.is_empty() {
            return Err(BackupError::custom(format!("表 {table} 没有可读取的列")));
        }

        Ok(columns)
    }

    fn map_type(&self, column: &ColumnInfo) -> PortableType {
        let native = column.data_type.trim().to_ascii_uppercase();
        let base = native.split('(').next().unwrap_or_default().trim();

        match base {
            "VARCHAR" | "CHAR" | "BPCHAR" | "STRING" | "CHARACTER VARYING" => {
                match column.char_max_length {
                    Some(len) if len > 0 => PortableType::Varchar(len),
                    _ => PortableType::Text,
                }
            }
            "TEXT" | "UUID" | "ENUM" => PortableType::Text,
            "TINYINT" | "SMALLINT" | "INTEGER" | "INT" | "UTINYINT" | "USMALLINT" => {
                PortableType::Integer
            }
            "BIGINT" | "HUGEINT" | "UINTEGER" | "UBIGINT" => PortableType::BigInt,
            "BOOLEAN" | "BOOL" => PortableType::Boolean,
            "DECIMAL" | "NUMERIC" => match (column.numeric_precision, column.numeric_scale) {
                (Some(precision), Some(scale)) => PortableType::Numeric(Some((precision, scale))),
                _ => PortableType::Numeric(None),
            },
            "DOUBLE" | "FLOAT" | "REAL" | "FLOAT4" | "FLOAT8" => PortableType::Double,
            "JSON" => PortableType::Json,
            other if other.starts_with("TIMESTAMP") || other == "DATE" || other == "DATETIME" => {
                PortableType::Timestamp
            }
            _ => PortableType::Text,
        }
    }

    fn read_rows(&self, table: &str, columns: &[ColumnInfo]) -> Result<Vec<Vec<Option<String>>>> {
        let conn = self.conn()?;
        let select_list = columns
            .iter()
            .map(|c| format!("CAST({} AS VARCHAR)", quote_ident(&c.name)))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "SELECT {} FROM {}.{}",
            select_list,
            quote_ident(&self.schema),
            quote_ident(table)
        );

        let width = columns.len();
        let mut stmt = conn.prepare(&sql)?;
        let row_iter = stmt.query_map([], |row| {
            let mut values = Vec::with_capacity(width);
            for i in 0..width {
                values.push(row.get::<_, Option<String>>(i)?);
            }
            Ok(values)
        })?;

        let mut rows = Vec::new();
        for row in row_iter {
            rows.push(row?);
        }

        Ok(rows)
    }

    fn execute(&self, statement: &str) -> Result<()> {
        let conn = self.conn()?;
        conn.execute_batch(statement)?;
        Ok(())
    }

    fn raw_files(&self) -> Vec<PathBuf> {
        // SQL 导出才是权威备份，不额外拷贝正在使用的数据库文件
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded_source() -> DuckDbSource {
        let source = DuckDbSource::in_memory().unwrap();
        source
            .execute(
                "CREATE TABLE leads (
                    id INTEGER NOT NULL,
                    phone VARCHAR NOT NULL,
                    qualified BOOLEAN DEFAULT false,
                    score DECIMAL(5,2),
                    created_at TIMESTAMP
                );
                INSERT INTO leads VALUES (1, '+15550001', true, 12.50, TIMESTAMP '2024-03-01 10:00:00');
                INSERT INTO leads VALUES (2, '+15550002', NULL, NULL, NULL);
                CREATE VIEW qualified_leads AS SELECT * FROM leads WHERE qualified;",
            )
            .unwrap();
        source
    }

    #[test]
    fn test_list_tables_skips_views() {
        let source = seeded_source();
        let tables = source.list_tables().unwrap();
        assert_eq!(tables, vec!["leads".to_string()]);
    }

    #[test]
    fn test_describe_and_map_types() {
        let source = seeded_source();
        let columns = source.describe_table("leads").unwrap();
        let names: Vec<_> = columns.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["id", "phone", "qualified", "score", "created_at"]);

        assert!(!columns[0].nullable);
        assert!(columns[2].default.is_some());

        let mapped: Vec<_> = columns.iter().map(|c| source.map_type(c)).collect();
        assert_eq!(mapped[0], PortableType::Integer);
        assert!(matches!(
            mapped[1],
            PortableType::Text | PortableType::Varchar(_)
        ));
        assert_eq!(mapped[2], PortableType::Boolean);
        assert_eq!(mapped[3], PortableType::Numeric(Some((5, 2))));
        assert_eq!(mapped[4], PortableType::Timestamp);
    }

    #[test]
    fn test_map_type_fallbacks() {
        let source = DuckDbSource::in_memory().unwrap();
        let mut varchar = ColumnInfo::new("code", "VARCHAR");
        varchar.char_max_length = Some(16);
        assert_eq!(source.map_type(&varchar), PortableType::Varchar(16));
        assert_eq!(
            source.map_type(&ColumnInfo::new("n", "BIGINT")),
            PortableType::BigInt
        );
        assert_eq!(
            source.map_type(&ColumnInfo::new("t", "TIMESTAMP WITH TIME ZONE")),
            PortableType::Timestamp
        );
        assert_eq!(
            source.map_type(&ColumnInfo::new("d", "DOUBLE")),
            PortableType::Double
        );
        assert_eq!(
            source.map_type(&ColumnInfo::new("blob", "BLOB")),
            PortableType::Text
        );
    }

    #[test]
    fn test_read_rows_as_text() {
        let source = seeded_source();
        let columns = source.describe_table("leads").unwrap();
        let rows = source.read_rows("leads", &columns).unwrap();

        assert_eq!(rows.len(), 2);
        let second = rows.iter().find(|r| r[0].as_deref() == Some("2")).unwrap();
        assert_eq!(second[1].as_deref(), Some("+15550002"));
        assert_eq!(second[2], None);
        assert_eq!(source.query_count("leads").unwrap(), 2);
    }

    #[test]
    fn test_describe_missing_table_fails() {
        let source = DuckDbSource::in_memory().unwrap();
        assert!(source.describe_table("nope").is_err());
    }
}
