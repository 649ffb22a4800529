//! 完整备份流程：导出脚本后压缩，生成完成提示

use std::path::PathBuf;

use chrono::{Local, NaiveDateTime};

use crate::driver::{DriverError, DumpSession, create_connection};
use crate::export::run_with;
use crate::package::package;
use crate::paths::script_name;
use crate::progress::{ProgressSink, Stage};
use crate::{
    ArchiveResult, ArchiveStatus, DEFAULT_WINDOW_SIZE, DataSourceOptions, ExportConfig, ExportResult, ExportStatus,
    TableFilter,
};

/// 一次备份请求
#[derive(Clone)]
pub struct BackupRequest {
    /// 站点标识，作为文件名前缀
    pub identifier: String,
    pub connection: DataSourceOptions,
    pub folder: PathBuf,
    pub tables: TableFilter,
    pub window_size: usize,
}

impl BackupRequest {
    pub fn new(
        identifier: impl Into<String>,
        connection: DataSourceOptions,
        folder: impl Into<PathBuf>,
    ) -> Self {
        Self {
            identifier: identifier.into(),
            connection,
            folder: folder.into(),
            tables: TableFilter::default(),
            window_size: DEFAULT_WINDOW_SIZE,
        }
    }
}

#[derive(Debug)]
pub struct BackupReport {
    pub export: ExportResult,
    /// 导出失败时不压缩，为 None
    pub archive: Option<ArchiveResult>,
    /// 提供给调用方展示的结果说明
    pub message: String,
}

impl BackupReport {
    pub fn succeeded(&self) -> bool {
        self.export.status != ExportStatus::Failed
            && self
                .archive
                .as_ref()
                .is_some_and(|a| a.status == ArchiveStatus::Created)
    }
}

pub fn run_backup(
    request: &BackupRequest,
    progress: &mut dyn ProgressSink,
) -> BackupReport {
    run_backup_with(request, create_connection, Local::now().naive_local(), progress)
}

pub fn run_backup_with<F>(
    request: &BackupRequest,
    connect: F,
    started_at: NaiveDateTime,
    progress: &mut dyn ProgressSink,
) -> BackupReport
where
    F: FnOnce(&DataSourceOptions) -> Result<Box<dyn DumpSession>, DriverError>,
{
    let config = ExportConfig::new(
        request.connection.clone(),
        request.folder.clone(),
        script_name(&request.identifier, started_at),
    )
    .tables(request.tables.clone())
    .window_size(request.window_size);

    let export = run_with(&config, connect, progress);
    if export.status == ExportStatus::Failed {
        let reason = export
            .error
            .as_ref()
            .map(|e| e.to_string())
            .unwrap_or_else(|| "unknown error".into());
        return BackupReport {
            export,
            archive: None,
            message: format!("The backup failed: {}", reason),
        };
    }

    progress.on_stage(Stage::PackagingStarted, &export.script_path.display().to_string());
    let archive = package(&export.script_path);

    let message = match archive.status {
        ArchiveStatus::Created => {
            progress.on_stage(Stage::PackagingComplete, &archive.archive_path.display().to_string());
            format!("The backup file is ready at: {}", archive.archive_path.display())
        }
        _ => {
            let reason = archive
                .error
                .as_ref()
                .map(|e| e.to_string())
                .unwrap_or_else(|| format!("{:?}", archive.status));
            progress.on_stage(Stage::Failed, &reason);
            format!(
                "The backup script was written to {} but could not be compressed: {}",
                export.script_path.display(),
                reason
            )
        }
    };
    tracing::info!("{}", message);

    BackupReport {
        export,
        archive: Some(archive),
        message,
    }
}
