#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use sqlbak_core::{
    CellValue, ColumnDescriptor, DataSourceOptions, DriverError, DumpSession, MySQLOptions, RoutineKind, ServerInfo,
};

/// 内存中的表
#[derive(Clone, Default)]
pub struct FakeTable {
    pub name: String,
    pub columns: Vec<ColumnDescriptor>,
    pub rows: Vec<Vec<CellValue>>,
    /// 覆盖 COUNT(*) 的结果，模拟导出期间表被修改
    pub reported_rows: Option<u64>,
    /// 读取该 offset 的窗口时报错
    pub fail_window_at: Option<u64>,
}

impl FakeTable {
    pub fn new(
        name: &str,
        columns: &[(&str, &str)],
    ) -> Self {
        Self {
            name: name.to_string(),
            columns: columns
                .iter()
                .enumerate()
                .map(|(i, (column, declared))| ColumnDescriptor::new(*column, i + 1, *declared))
                .collect(),
            ..Default::default()
        }
    }

    pub fn row(
        mut self,
        values: Vec<CellValue>,
    ) -> Self {
        self.rows.push(values);
        self
    }

    pub fn create_statement(&self) -> String {
        let columns: Vec<String> = self
            .columns
            .iter()
            .map(|c| format!("  `{}` {}", c.name, c.declared_type))
            .collect();
        format!("CREATE TABLE `{}` (\n{}\n)", self.name, columns.join(",\n"))
    }
}

/// 一次 window 调用
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WindowCall {
    pub table: String,
    pub offset: u64,
    pub limit: u64,
}

#[derive(Clone, Default)]
pub struct FakeDatabase {
    pub tables: Vec<FakeTable>,
    pub views: Vec<(String, String)>,
    pub procedures: Vec<(String, Option<String>)>,
    pub functions: Vec<(String, Option<String>)>,
    pub fail_table_names: bool,
    pub fail_views: bool,
    pub fail_routines: bool,
    pub windows: Arc<Mutex<Vec<WindowCall>>>,
}

impl FakeDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn table(
        mut self,
        table: FakeTable,
    ) -> Self {
        self.tables.push(table);
        self
    }

    pub fn view(
        mut self,
        name: &str,
        definition: &str,
    ) -> Self {
        self.views.push((name.to_string(), definition.to_string()));
        self
    }

    pub fn procedure(
        mut self,
        name: &str,
        definition: Option<&str>,
    ) -> Self {
        self.procedures.push((name.to_string(), definition.map(String::from)));
        self
    }

    pub fn function(
        mut self,
        name: &str,
        definition: Option<&str>,
    ) -> Self {
        self.functions.push((name.to_string(), definition.map(String::from)));
        self
    }

    pub fn window_calls(&self) -> Vec<WindowCall> {
        self.windows.lock().unwrap().clone()
    }

    /// 连接工厂，供 run_with / run_backup_with 使用
    pub fn connector(&self) -> impl FnOnce(&DataSourceOptions) -> Result<Box<dyn DumpSession>, DriverError> + use<> {
        let db = self.clone();
        move |_: &DataSourceOptions| Ok(Box::new(FakeSession { db }) as Box<dyn DumpSession>)
    }

    fn find(
        &self,
        table: &str,
    ) -> Result<&FakeTable, DriverError> {
        self.tables
            .iter()
            .find(|t| t.name == table)
            .ok_or_else(|| DriverError::query(format!("表 {}", table), "Table doesn't exist"))
    }
}

pub fn refuse_connection(_: &DataSourceOptions) -> Result<Box<dyn DumpSession>, DriverError> {
    Err(DriverError::Connection("Access denied for user 'openmrs'".into()))
}

pub fn connection() -> DataSourceOptions {
    DataSourceOptions::MySQL(MySQLOptions {
        host: "db".into(),
        username: "openmrs".into(),
        password: "secret".into(),
        database: "openmrs".into(),
        ..Default::default()
    })
}

pub struct FakeSession {
    db: FakeDatabase,
}

impl DumpSession for FakeSession {
    fn server_info(&mut self) -> Result<ServerInfo, DriverError> {
        Ok(ServerInfo {
            product: "MySQL".into(),
            version: "8.0.36".into(),
        })
    }

    fn table_names(&mut self) -> Result<Vec<String>, DriverError> {
        if self.db.fail_table_names {
            return Err(DriverError::query("查询表列表", "Lost connection to MySQL server"));
        }
        Ok(self.db.tables.iter().map(|t| t.name.clone()).collect())
    }

    fn view_names(&mut self) -> Result<Vec<String>, DriverError> {
        if self.db.fail_views {
            return Err(DriverError::query("查询视图列表", "SELECT command denied"));
        }
        Ok(self.db.views.iter().map(|(name, _)| name.clone()).collect())
    }

    fn routine_names(
        &mut self,
        kind: RoutineKind,
    ) -> Result<Vec<String>, DriverError> {
        if self.db.fail_routines {
            return Err(DriverError::query("查询例程列表", "SELECT command denied"));
        }
        let routines = match kind {
            RoutineKind::Procedure => &self.db.procedures,
            RoutineKind::Function => &self.db.functions,
        };
        Ok(routines.iter().map(|(name, _)| name.clone()).collect())
    }

    fn create_table(
        &mut self,
        table: &str,
    ) -> Result<String, DriverError> {
        Ok(self.db.find(table)?.create_statement())
    }

    fn create_view(
        &mut self,
        view: &str,
    ) -> Result<String, DriverError> {
        self.db
            .views
            .iter()
            .find(|(name, _)| name == view)
            .map(|(_, definition)| definition.clone())
            .ok_or_else(|| DriverError::query(format!("视图 {}", view), "View doesn't exist"))
    }

    fn create_routine(
        &mut self,
        kind: RoutineKind,
        name: &str,
    ) -> Result<Option<String>, DriverError> {
        let routines = match kind {
            RoutineKind::Procedure => &self.db.procedures,
            RoutineKind::Function => &self.db.functions,
        };
        Ok(routines
            .iter()
            .find(|(n, _)| n == name)
            .and_then(|(_, definition)| definition.clone()))
    }

    fn columns(
        &mut self,
        table: &str,
    ) -> Result<Vec<ColumnDescriptor>, DriverError> {
        Ok(self.db.find(table)?.columns.clone())
    }

    fn row_count(
        &mut self,
        table: &str,
    ) -> Result<u64, DriverError> {
        let table = self.db.find(table)?;
        Ok(table.reported_rows.unwrap_or(table.rows.len() as u64))
    }

    fn window(
        &mut self,
        table: &str,
        _columns: &[ColumnDescriptor],
        offset: u64,
        limit: u64,
    ) -> Result<Vec<Vec<CellValue>>, DriverError> {
        self.db.windows.lock().unwrap().push(WindowCall {
            table: table.to_string(),
            offset,
            limit,
        });

        let data = self.db.find(table)?;
        if data.fail_window_at == Some(offset) {
            return Err(DriverError::query(format!("读取表 {} 数据", table), "Lost connection to MySQL server"));
        }

        let start = (offset as usize).min(data.rows.len());
        let end = (offset.saturating_add(limit) as usize).min(data.rows.len());
        Ok(data.rows[start..end].to_vec())
    }
}
