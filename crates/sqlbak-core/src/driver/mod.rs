use crate::{CellValue, ColumnDescriptor, DataSourceOptions, RoutineKind};

pub use self::mysql::MySQLDriver;

mod mysql;

#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    #[error("{0}")]
    Other(String),
    #[error("配置字段缺失: {0}")]
    MissingField(String),
    #[error("配置字段非法: {0}")]
    InvalidField(String),
    #[error("连接失败: {0}")]
    Connection(String),
    #[error("{context}: {message}")]
    Query { context: String, message: String },
}

impl DriverError {
    pub fn query(
        context: impl Into<String>,
        message: impl ToString,
    ) -> Self {
        DriverError::Query {
            context: context.into(),
            message: message.to_string(),
        }
    }
}

/// 数据库产品信息，写入脚本头
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServerInfo {
    pub product: String,
    pub version: String,
}

pub trait DatabaseDriver {
    type Config;

    fn create_connection(
        &self,
        config: &Self::Config,
    ) -> Result<Box<dyn DumpSession>, DriverError>;
}

/// 一次导出独占的数据库会话，drop 时关闭连接
///
/// 每个枚举方法都发出一条新查询，并把结果整体收集为自有的 Vec 返回。
pub trait DumpSession: Send {
    fn server_info(&mut self) -> Result<ServerInfo, DriverError>;

    fn table_names(&mut self) -> Result<Vec<String>, DriverError>;

    fn view_names(&mut self) -> Result<Vec<String>, DriverError>;

    fn routine_names(
        &mut self,
        kind: RoutineKind,
    ) -> Result<Vec<String>, DriverError>;

    fn create_table(
        &mut self,
        table: &str,
    ) -> Result<String, DriverError>;

    fn create_view(
        &mut self,
        view: &str,
    ) -> Result<String, DriverError>;

    /// 权限不足时服务端返回空定义，此时为 None
    fn create_routine(
        &mut self,
        kind: RoutineKind,
        name: &str,
    ) -> Result<Option<String>, DriverError>;

    fn columns(
        &mut self,
        table: &str,
    ) -> Result<Vec<ColumnDescriptor>, DriverError>;

    fn row_count(
        &mut self,
        table: &str,
    ) -> Result<u64, DriverError>;

    /// 按位置读取 [offset, offset + limit) 范围内的行，不带排序子句
    fn window(
        &mut self,
        table: &str,
        columns: &[ColumnDescriptor],
        offset: u64,
        limit: u64,
    ) -> Result<Vec<Vec<CellValue>>, DriverError>;
}

pub fn create_connection(opts: &DataSourceOptions) -> Result<Box<dyn DumpSession>, DriverError> {
    match opts {
        DataSourceOptions::MySQL(config) => MySQLDriver.create_connection(config),
    }
}

pub fn escape_backtick(s: &str) -> String {
    s.replace('`', "``")
}

pub fn quote_ident(s: &str) -> String {
    format!("`{}`", escape_backtick(s))
}

/// INSERT 列清单：普通列名原样输出，保留字或含特殊字符的列名加反引号
pub fn format_columns(columns: &[String]) -> String {
    // MySQL 保留关键字列表
    // 参考: https://dev.mysql.com/doc/refman/8.0/en/keywords.html
    #[rustfmt::skip]
    let keywords = [
        "SELECT", "FROM", "WHERE", "INSERT", "UPDATE", "DELETE",
        "CREATE", "DROP", "ALTER", "TABLE", "INDEX", "VIEW",
        "JOIN", "LEFT", "RIGHT", "INNER", "OUTER", "ON",
        "GROUP", "ORDER", "BY", "HAVING", "LIMIT", "OFFSET",
        "AS", "AND", "OR", "NOT", "IN", "IS", "NULL",
        "PRIMARY", "KEY", "FOREIGN", "REFERENCES", "CONSTRAINT",
        "DEFAULT", "AUTO_INCREMENT", "UNIQUE", "CHECK",
        "DISTINCT", "ALL", "BETWEEN", "LIKE", "EXISTS",
        "CASE", "WHEN", "THEN", "ELSE", "END",
        "UNION", "INTERSECT", "EXCEPT", "CONDITION", "RANGE",
        "DATABASE", "SCHEMA", "TRIGGER", "PROCEDURE", "FUNCTION",
        "INT", "VARCHAR", "TEXT", "DATE", "DATETIME", "TIMESTAMP",
        "CHAR", "DECIMAL", "FLOAT", "DOUBLE", "BOOLEAN",
        "READ", "WRITE", "USAGE", "INTERVAL", "RELEASE",
    ];

    columns
        .iter()
        .map(|c| {
            let plain = !c.is_empty()
                && !c.starts_with(|ch: char| ch.is_ascii_digit())
                && c.chars().all(|ch| ch.is_ascii_alphanumeric() || ch == '_' || ch == '$');
            if !plain || keywords.contains(&c.to_uppercase().as_str()) {
                quote_ident(c)
            } else {
                c.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join(", ")
}
