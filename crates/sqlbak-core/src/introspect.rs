//! 模式自省：枚举表、视图、存储过程与函数
//!
//! 每一轮枚举都发出独立查询并先完整收集为 Vec，再发起依赖它的后续查询。

use crate::driver::{DriverError, DumpSession};
use crate::{RoutineDescriptor, RoutineKind, TableDescriptor, TableFilter, ViewDescriptor};

/// 列出需要导出的表名，顺序与自省结果一致
pub fn list_tables(
    session: &mut dyn DumpSession,
    filter: &TableFilter,
) -> Result<Vec<String>, DriverError> {
    let names = session.table_names()?;
    tracing::debug!("数据库中共 {} 张表", names.len());

    for wanted in &filter.include {
        if !names.contains(wanted) {
            tracing::warn!("包含列表中的表不存在: {}", wanted);
        }
    }

    Ok(filter.apply(names))
}

/// 读取列信息与行数快照
pub fn describe_table(
    session: &mut dyn DumpSession,
    name: &str,
) -> Result<TableDescriptor, DriverError> {
    let columns = session.columns(name)?;
    let row_count = session.row_count(name)?;
    Ok(TableDescriptor {
        name: name.to_string(),
        columns,
        row_count,
    })
}

pub fn create_table_statement(
    session: &mut dyn DumpSession,
    name: &str,
) -> Result<String, DriverError> {
    session.create_table(name)
}

/// 列出视图及其定义；单个视图取定义失败时跳过该视图，并记入 skipped
pub fn list_views(
    session: &mut dyn DumpSession,
    skipped: &mut Vec<String>,
) -> Result<Vec<ViewDescriptor>, DriverError> {
    let names = session.view_names()?;

    let mut views = Vec::with_capacity(names.len());
    for name in names {
        match session.create_view(&name) {
            Ok(definition) => views.push(ViewDescriptor { name, definition }),
            Err(e) => {
                tracing::warn!("获取视图 {} 定义失败，已跳过: {}", name, e);
                skipped.push(format!("跳过视图 {}: {}", name, e));
            }
        }
    }
    Ok(views)
}

/// 先存储过程后函数；取不到定义的例程跳过，并记入 skipped
pub fn list_routines(
    session: &mut dyn DumpSession,
    skipped: &mut Vec<String>,
) -> Result<Vec<RoutineDescriptor>, DriverError> {
    let mut routines = vec![];
    for &kind in RoutineKind::all() {
        let names = session.routine_names(kind)?;
        for name in names {
            match session.create_routine(kind, &name) {
                Ok(Some(definition)) => routines.push(RoutineDescriptor { name, kind, definition }),
                Ok(None) => {
                    tracing::warn!("{} {} 定义不可见（权限不足？），已跳过", kind.keyword(), name);
                    skipped.push(format!("跳过 {} {}: 定义不可见", kind.keyword(), name));
                }
                Err(e) => {
                    tracing::warn!("获取 {} {} 定义失败，已跳过: {}", kind.keyword(), name, e);
                    skipped.push(format!("跳过 {} {}: {}", kind.keyword(), name, e));
                }
            }
        }
    }
    Ok(routines)
}
