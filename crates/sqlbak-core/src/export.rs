//! 整库导出：表结构与数据、视图、存储过程与函数依次写入同一个脚本
//!
//! 单表查询失败只记录在结果中；连接、建目录、自省和脚本写入失败会中止导出，
//! 已写出的不完整脚本随 ScriptFile 一同删除。

use std::fs;
use std::io;
use std::path::PathBuf;
use std::time::Instant;

use crate::driver::{DriverError, DumpSession, create_connection};
use crate::introspect::list_tables;
use crate::progress::{ProgressSink, Stage};
use crate::routine::{dump_routines, dump_views};
use crate::script::ScriptFile;
use crate::table::{DumpError, TableDumper};
use crate::{DataSourceOptions, ExportConfig, ExportResult, ExportStatus, TableOutcome};

#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    #[error("数据库连接失败: {0}")]
    Connection(#[source] DriverError),
    #[error("无法创建备份目录 {path}: {source}")]
    Filesystem {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("读取数据库结构失败: {0}")]
    Introspection(#[source] DriverError),
    #[error("写入脚本失败: {0}")]
    Write(#[source] io::Error),
    #[error("脚本收尾失败: {0}")]
    Finalize(#[source] io::Error),
}

/// 使用默认驱动导出
pub fn run(
    config: &ExportConfig,
    progress: &mut dyn ProgressSink,
) -> ExportResult {
    run_with(config, create_connection, progress)
}

/// 使用指定的连接工厂导出
pub fn run_with<F>(
    config: &ExportConfig,
    connect: F,
    progress: &mut dyn ProgressSink,
) -> ExportResult
where
    F: FnOnce(&DataSourceOptions) -> Result<Box<dyn DumpSession>, DriverError>,
{
    let start_time = Instant::now();
    let script_path = config.script_path();
    let mut tables = vec![];
    let mut warnings = vec![];

    tracing::info!("开始导出: {} -> {}", config.connection.endpoint(), script_path.display());

    match export(config, connect, progress, &mut tables, &mut warnings) {
        Ok(()) => {
            let failed = tables.iter().filter(|t| !t.is_ok()).count();
            let status = if failed == 0 && warnings.is_empty() {
                ExportStatus::Complete
            } else {
                ExportStatus::Partial
            };
            tracing::info!(
                "导出结束: {} 张表，失败 {} 张，警告 {} 条，耗时 {:.1} 秒",
                tables.len(),
                failed,
                warnings.len(),
                start_time.elapsed().as_secs_f64()
            );
            progress.on_stage(Stage::ExportComplete, &script_path.display().to_string());

            ExportResult {
                script_path,
                tables,
                warnings,
                status,
                error: None,
            }
        }
        Err(e) => {
            tracing::error!("导出失败: {}", e);
            progress.on_stage(Stage::Failed, &e.to_string());

            ExportResult {
                script_path,
                tables,
                warnings,
                status: ExportStatus::Failed,
                error: Some(e),
            }
        }
    }
}

fn export<F>(
    config: &ExportConfig,
    connect: F,
    progress: &mut dyn ProgressSink,
    tables: &mut Vec<TableOutcome>,
    warnings: &mut Vec<String>,
) -> Result<(), ExportError>
where
    F: FnOnce(&DataSourceOptions) -> Result<Box<dyn DumpSession>, DriverError>,
{
    // 1. 建立连接
    let endpoint = config.connection.endpoint();
    let mut session = connect(&config.connection).map_err(ExportError::Connection)?;
    tracing::info!("数据库连接成功: {}", endpoint);
    progress.on_stage(Stage::Connected, &endpoint);

    // 2. 准备备份目录
    fs::create_dir_all(&config.folder).map_err(|source| ExportError::Filesystem {
        path: config.folder.clone(),
        source,
    })?;

    // 3. 自省
    let server = session.server_info().map_err(ExportError::Introspection)?;
    tracing::info!("数据库版本: {} {}", server.product, server.version);
    let names = list_tables(session.as_mut(), &config.tables).map_err(ExportError::Introspection)?;
    tracing::info!("需要导出 {} 张表", names.len());
    progress.on_stage(Stage::IntrospectionComplete, &format!("{} 张表", names.len()));

    // 4. 脚本头
    let script_path = config.script_path();
    let mut script = ScriptFile::create(&script_path).map_err(|source| ExportError::Filesystem {
        path: script_path.clone(),
        source,
    })?;
    let writer = script.writer().map_err(ExportError::Write)?;
    writer.write_header(&endpoint, &server).map_err(ExportError::Write)?;

    // 5. 逐表导出
    let dumper = TableDumper::new(config.window_size);
    let total = names.len();
    for (i, name) in names.iter().enumerate() {
        let outcome = dumper.dump(session.as_mut(), name, writer).map_err(ExportError::Write)?;
        progress.on_stage(
            Stage::TableComplete,
            &format!("{}/{} {} ({} 行)", i + 1, total, name, outcome.rows),
        );
        tables.push(outcome);
    }

    // 6. 视图与例程；查询失败跳过该阶段并记为警告，写入失败中止
    match dump_views(session.as_mut(), writer, warnings) {
        Ok(count) => progress.on_stage(Stage::ViewsComplete, &format!("{} 个视图", count)),
        Err(DumpError::Query(e)) => {
            tracing::warn!("导出视图失败，已跳过: {}", e);
            warnings.push(format!("视图未导出: {}", e));
            progress.on_stage(Stage::ViewsComplete, &e.to_string());
        }
        Err(DumpError::Write(e)) => return Err(ExportError::Write(e)),
    }

    match dump_routines(session.as_mut(), writer, warnings) {
        Ok(count) => progress.on_stage(Stage::RoutinesComplete, &format!("{} 个存储过程或函数", count)),
        Err(DumpError::Query(e)) => {
            tracing::warn!("导出存储过程与函数失败，已跳过: {}", e);
            warnings.push(format!("存储过程与函数未导出: {}", e));
            progress.on_stage(Stage::RoutinesComplete, &e.to_string());
        }
        Err(DumpError::Write(e)) => return Err(ExportError::Write(e)),
    }

    // 7. 脚本尾并落盘
    let bytes = writer.bytes_written();
    let path = script.finish().map_err(ExportError::Finalize)?;
    tracing::info!("脚本写入完成: {} ({} 字节)", path.display(), bytes);

    Ok(())
}
