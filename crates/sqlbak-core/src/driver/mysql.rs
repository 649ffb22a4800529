use mysql::{Conn, Opts, OptsBuilder, Row, SslOpts, Value, prelude::Queryable};

use crate::{CellValue, ColumnDescriptor, MySQLOptions, RoutineKind};

use super::{DatabaseDriver, DriverError, DumpSession, ServerInfo, quote_ident};

#[derive(Debug, Clone, Copy)]
pub struct MySQLDriver;

impl DatabaseDriver for MySQLDriver {
    type Config = MySQLOptions;

    fn create_connection(
        &self,
        config: &Self::Config,
    ) -> Result<Box<dyn DumpSession>, DriverError> {
        let conn = open_conn(config)?;
        Ok(Box::new(MySQLSession::new(conn)))
    }
}

struct MySQLSession {
    conn: Conn,
}

impl MySQLSession {
    fn new(conn: Conn) -> Self {
        Self { conn }
    }

    fn show_create(
        &mut self,
        sql: &str,
        field: &str,
    ) -> Result<Option<String>, DriverError> {
        tracing::debug!(sql = %sql);
        let row: Option<Row> = self
            .conn
            .query_first(sql)
            .map_err(|err| DriverError::query(format!("执行 {} 失败", sql), err))?;

        Ok(row.and_then(|row| text_field(&row, field)))
    }
}

impl DumpSession for MySQLSession {
    fn server_info(&mut self) -> Result<ServerInfo, DriverError> {
        let version: Option<String> = self
            .conn
            .query_first("SELECT VERSION()")
            .map_err(|err| DriverError::query("查询数据库版本失败", err))?;

        let version = version.unwrap_or_else(|| {
            let (major, minor, patch) = self.conn.server_version();
            format!("{}.{}.{}", major, minor, patch)
        });
        let product = if version.contains("MariaDB") { "MariaDB" } else { "MySQL" };

        Ok(ServerInfo {
            product: product.into(),
            version,
        })
    }

    fn table_names(&mut self) -> Result<Vec<String>, DriverError> {
        let sql = "SELECT TABLE_NAME FROM information_schema.TABLES \
                   WHERE TABLE_SCHEMA = DATABASE() AND TABLE_TYPE = 'BASE TABLE' ORDER BY TABLE_NAME";
        self.conn
            .query(sql)
            .map_err(|err| DriverError::query("查询表列表失败", err))
    }

    fn view_names(&mut self) -> Result<Vec<String>, DriverError> {
        let sql = "SELECT TABLE_NAME FROM information_schema.TABLES \
                   WHERE TABLE_SCHEMA = DATABASE() AND TABLE_TYPE = 'VIEW' ORDER BY TABLE_NAME";
        self.conn
            .query(sql)
            .map_err(|err| DriverError::query("查询视图列表失败", err))
    }

    fn routine_names(
        &mut self,
        kind: RoutineKind,
    ) -> Result<Vec<String>, DriverError> {
        let sql = "SELECT ROUTINE_NAME FROM information_schema.ROUTINES \
                   WHERE ROUTINE_SCHEMA = DATABASE() AND ROUTINE_TYPE = ? ORDER BY ROUTINE_NAME";
        self.conn
            .exec(sql, (kind.keyword(),))
            .map_err(|err| DriverError::query(format!("查询 {} 列表失败", kind.keyword()), err))
    }

    fn create_table(
        &mut self,
        table: &str,
    ) -> Result<String, DriverError> {
        let sql = format!("SHOW CREATE TABLE {}", quote_ident(table));
        self.show_create(&sql, "Create Table")?
            .ok_or_else(|| DriverError::query(sql, "缺少 Create Table 字段"))
    }

    fn create_view(
        &mut self,
        view: &str,
    ) -> Result<String, DriverError> {
        let sql = format!("SHOW CREATE VIEW {}", quote_ident(view));
        self.show_create(&sql, "Create View")?
            .ok_or_else(|| DriverError::query(sql, "缺少 Create View 字段"))
    }

    fn create_routine(
        &mut self,
        kind: RoutineKind,
        name: &str,
    ) -> Result<Option<String>, DriverError> {
        let sql = format!("SHOW CREATE {} {}", kind.keyword(), quote_ident(name));
        let field = match kind {
            RoutineKind::Procedure => "Create Procedure",
            RoutineKind::Function => "Create Function",
        };
        self.show_create(&sql, field)
    }

    fn columns(
        &mut self,
        table: &str,
    ) -> Result<Vec<ColumnDescriptor>, DriverError> {
        let sql = format!("SHOW FULL COLUMNS FROM {}", quote_ident(table));
        let rows: Vec<Row> = self
            .conn
            .query(&sql)
            .map_err(|err| DriverError::query("查询列信息失败", err))?;

        let mut columns = Vec::with_capacity(rows.len());
        for (ordinal, row) in rows.iter().enumerate() {
            let name = text_field(row, "Field").ok_or_else(|| DriverError::Other("缺少 Field 字段".into()))?;
            let kind = text_field(row, "Type").unwrap_or_default();
            columns.push(ColumnDescriptor::new(name, ordinal + 1, kind));
        }
        Ok(columns)
    }

    fn row_count(
        &mut self,
        table: &str,
    ) -> Result<u64, DriverError> {
        let sql = format!("SELECT COUNT(*) FROM {}", quote_ident(table));
        let count: Option<u64> = self
            .conn
            .query_first(&sql)
            .map_err(|err| DriverError::query("统计行数失败", err))?;
        Ok(count.unwrap_or(0))
    }

    fn window(
        &mut self,
        table: &str,
        columns: &[ColumnDescriptor],
        offset: u64,
        limit: u64,
    ) -> Result<Vec<Vec<CellValue>>, DriverError> {
        let cols = if columns.is_empty() {
            "*".to_string()
        } else {
            columns
                .iter()
                .map(|c| quote_ident(&c.name))
                .collect::<Vec<_>>()
                .join(", ")
        };
        let sql = format!("SELECT {} FROM {} LIMIT {} OFFSET {}", cols, quote_ident(table), limit, offset);
        tracing::debug!(sql = %sql);

        let rows: Vec<Row> = self
            .conn
            .exec_iter(&sql, ())
            .map_err(|err| DriverError::query("执行查询失败", err))?
            .collect::<Result<Vec<_>, _>>()
            .map_err(|err| DriverError::query("读取结果失败", err))?;

        Ok(rows
            .into_iter()
            .map(|row| row.unwrap().into_iter().map(cell_value).collect())
            .collect())
    }
}

fn open_conn(config: &MySQLOptions) -> Result<Conn, DriverError> {
    let opts = match config.url.as_deref().map(str::trim).filter(|u| !u.is_empty()) {
        Some(url) => Opts::from_url(url).map_err(|err| DriverError::InvalidField(format!("url: {}", err)))?,
        None => {
            if config.host.trim().is_empty() {
                return Err(DriverError::MissingField("host".into()));
            }
            if config.username.trim().is_empty() {
                return Err(DriverError::MissingField("username".into()));
            }
            if config.database.trim().is_empty() {
                return Err(DriverError::MissingField("database".into()));
            }
            let port = config
                .port
                .trim()
                .parse::<u16>()
                .map_err(|_| DriverError::InvalidField(format!("port: {}", config.port)))?;

            let mut builder = OptsBuilder::new();
            builder = builder.ip_or_hostname(Some(config.host.clone()));
            builder = builder.tcp_port(port);
            builder = builder.user(Some(config.username.clone()));
            builder = builder.pass(Some(config.password.clone()));
            builder = builder.db_name(Some(config.database.clone()));

            if config.use_tls {
                builder = builder.ssl_opts(Some(SslOpts::default()));
            }
            Opts::from(builder)
        }
    };

    Conn::new(opts).map_err(|err| DriverError::Connection(err.to_string()))
}

fn text_field(
    row: &Row,
    field: &str,
) -> Option<String> {
    match row.get::<Value, _>(field).unwrap_or(Value::NULL) {
        Value::NULL => None,
        Value::Bytes(bytes) => Some(String::from_utf8_lossy(&bytes).into_owned()),
        other => Some(cell_value(other).to_string()),
    }
}

fn cell_value(value: Value) -> CellValue {
    match value {
        Value::NULL => CellValue::Null,
        Value::Bytes(bytes) => CellValue::Bytes(bytes),
        Value::Int(int) => CellValue::Int(int),
        Value::UInt(uint) => CellValue::UInt(uint),
        Value::Float(float) => CellValue::Float(float),
        Value::Double(double) => CellValue::Double(double),
        Value::Date(year, month, day, hour, minute, second, micros) => {
            let mut text = format!("{year:04}-{month:02}-{day:02}");
            if hour != 0 || minute != 0 || second != 0 || micros != 0 {
                text.push_str(&format!(" {hour:02}:{minute:02}:{second:02}"));
            }
            if micros != 0 {
                text.push_str(&format!(".{micros:06}"));
            }
            CellValue::Text(text)
        }
        Value::Time(neg, days, hours, minutes, seconds, micros) => {
            let sign = if neg { "-" } else { "" };
            let hours = days * 24 + u32::from(hours);
            let mut text = format!("{sign}{hours:02}:{minutes:02}:{seconds:02}");
            if micros != 0 {
                text.push_str(&format!(".{micros:06}"));
            }
            CellValue::Text(text)
        }
    }
}
