use std::io::{self, Write};
use std::time::Instant;

use crate::driver::{DriverError, DumpSession, format_columns, quote_ident};
use crate::escape::escape;
use crate::introspect::{create_table_statement, describe_table};
use crate::script::ScriptWriter;
use crate::{CellValue, ColumnClass, ColumnDescriptor, DEFAULT_WINDOW_SIZE, TableOutcome};

#[derive(Debug, thiserror::Error)]
pub enum DumpError {
    /// 查询失败，只影响当前表或当前阶段
    #[error(transparent)]
    Query(#[from] DriverError),
    /// 脚本写入失败，脚本已不可信
    #[error("写入脚本失败: {0}")]
    Write(#[from] io::Error),
}

/// 按固定窗口分页导出表数据
#[derive(Debug, Clone, Copy)]
pub struct TableDumper {
    window_size: u64,
}

impl Default for TableDumper {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW_SIZE)
    }
}

impl TableDumper {
    pub fn new(window_size: usize) -> Self {
        Self {
            window_size: window_size.max(1) as u64,
        }
    }

    /// 导出单张表的结构与数据
    ///
    /// 查询失败记录在返回的 TableOutcome 中；只有脚本写入失败才返回 Err。
    pub fn dump<W: Write>(
        &self,
        session: &mut dyn DumpSession,
        table: &str,
        writer: &mut ScriptWriter<W>,
    ) -> io::Result<TableOutcome> {
        let start_time = Instant::now();
        let mut rows = 0u64;

        match self.dump_table(session, table, writer, &mut rows) {
            Ok(()) => {
                tracing::info!(
                    "表 {} 导出完成，共 {} 行，耗时 {:.1} 秒",
                    table,
                    rows,
                    start_time.elapsed().as_secs_f64()
                );
                Ok(TableOutcome {
                    table: table.to_string(),
                    rows,
                    error: None,
                })
            }
            Err(DumpError::Query(e)) => {
                tracing::warn!("导出表 {} 失败，已写入 {} 行: {}", table, rows, e);
                Ok(TableOutcome {
                    table: table.to_string(),
                    rows,
                    error: Some(e.to_string()),
                })
            }
            Err(DumpError::Write(e)) => {
                tracing::error!("写入表 {} 时脚本输出失败: {}", table, e);
                Err(e)
            }
        }
    }

    fn dump_table<W: Write>(
        &self,
        session: &mut dyn DumpSession,
        table: &str,
        writer: &mut ScriptWriter<W>,
        rows: &mut u64,
    ) -> Result<(), DumpError> {
        let create = create_table_statement(session, table)?;
        let descriptor = describe_table(session, table)?;
        tracing::debug!(
            "表 {} 共 {} 列，行数快照 {}",
            table,
            descriptor.columns.len(),
            descriptor.row_count
        );

        writer.write_section(&structure_section(table, &create))?;

        // 窗口互不重叠且恰好覆盖 [0, row_count)，快照之后新增的行不导出
        let mut offset = 0u64;
        while offset < descriptor.row_count {
            let limit = self.window_size.min(descriptor.row_count - offset);
            let window = session.window(table, &descriptor.columns, offset, limit)?;
            tracing::debug!("表 {} offset={} 返回 {} 行", table, offset, window.len());

            // 整条 INSERT 先在内存拼好，再作为一个单元写出
            if let Some(statement) = build_insert(table, &descriptor.columns, &window) {
                writer.write_section(&statement)?;
                *rows += window.len() as u64;
            }
            offset += self.window_size;
        }

        Ok(())
    }
}

fn structure_section(
    table: &str,
    create: &str,
) -> String {
    let ident = quote_ident(table);
    format!(
        "\n\n-- Structure for table {ident}\nDROP TABLE IF EXISTS {ident};\n{create};\n\n\n\n-- Data for table {ident}\n"
    )
}

/// 一个窗口的 INSERT 语句；窗口为空时不生成任何内容
pub fn build_insert(
    table: &str,
    columns: &[ColumnDescriptor],
    rows: &[Vec<CellValue>],
) -> Option<String> {
    if rows.is_empty() {
        return None;
    }

    let names: Vec<String> = columns.iter().map(|c| c.name.clone()).collect();
    let mut sql = format!("INSERT INTO {} ({}) VALUES ", quote_ident(table), format_columns(&names));

    for (i, row) in rows.iter().enumerate() {
        if i > 0 {
            sql.push_str(", ");
        }
        sql.push('(');
        for (j, value) in row.iter().enumerate() {
            if j > 0 {
                sql.push_str(", ");
            }
            let class = columns.get(j).map(|c| c.class).unwrap_or(ColumnClass::Text);
            sql.push_str(&encode_value(value, class));
        }
        sql.push(')');
    }
    sql.push_str(";\n");

    Some(sql)
}

/// 将单元格编码为 SQL 字面量
pub fn encode_value(
    value: &CellValue,
    class: ColumnClass,
) -> String {
    if let CellValue::Null = value {
        return "NULL".to_string();
    }

    match class {
        ColumnClass::Flag => {
            if is_truthy(value) {
                "1".to_string()
            } else {
                "0".to_string()
            }
        }
        ColumnClass::Numeric => numeric_literal(value).unwrap_or_else(|| quoted(value)),
        ColumnClass::Text => quoted(value),
    }
}

fn quoted(value: &CellValue) -> String {
    match value {
        // 非 UTF-8 的二进制数据用十六进制字面量，保证逐字节还原
        CellValue::Bytes(bytes) => match std::str::from_utf8(bytes) {
            Ok(text) => format!("'{}'", escape(text)),
            Err(_) => hex_literal(bytes),
        },
        CellValue::Text(text) => format!("'{}'", escape(text)),
        other => format!("'{}'", escape(&other.to_string())),
    }
}

fn hex_literal(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2 + 3);
    out.push_str("X'");
    for b in bytes {
        out.push_str(&format!("{:02X}", b));
    }
    out.push('\'');
    out
}

fn numeric_literal(value: &CellValue) -> Option<String> {
    match value {
        CellValue::Int(v) => Some(v.to_string()),
        CellValue::UInt(v) => Some(v.to_string()),
        CellValue::Float(v) if v.is_finite() => Some(v.to_string()),
        CellValue::Double(v) if v.is_finite() => Some(v.to_string()),
        CellValue::Text(text) => looks_numeric(text).then(|| text.clone()),
        CellValue::Bytes(bytes) => std::str::from_utf8(bytes)
            .ok()
            .filter(|text| looks_numeric(text))
            .map(String::from),
        _ => None,
    }
}

fn looks_numeric(text: &str) -> bool {
    !text.is_empty()
        && text
            .bytes()
            .all(|b| b.is_ascii_digit() || matches!(b, b'+' | b'-' | b'.' | b'e' | b'E'))
        && text.parse::<f64>().is_ok()
}

fn is_truthy(value: &CellValue) -> bool {
    match value {
        CellValue::Null => false,
        CellValue::Int(v) => *v != 0,
        CellValue::UInt(v) => *v != 0,
        CellValue::Float(v) => *v != 0.0,
        CellValue::Double(v) => *v != 0.0,
        CellValue::Text(text) => truthy_text(text),
        // BIT(1) 以原始字节返回，如 [0x01]
        CellValue::Bytes(bytes) => match std::str::from_utf8(bytes) {
            Ok(text) if !text.is_empty() && !text.chars().any(char::is_control) => truthy_text(text),
            _ => bytes.iter().any(|b| *b != 0),
        },
    }
}

fn truthy_text(text: &str) -> bool {
    let text = text.trim();
    text.eq_ignore_ascii_case("true") || text.parse::<f64>().map(|n| n != 0.0).unwrap_or(false)
}
