use sqlbak_core::{
    ArchiveStatus, BackupRequest, DataSourceOptions, ExportStatus, TableFilter, backup_folder, run_backup,
};

use crate::{BackupConfig, StdoutProgress, print_completed, print_error};

/// 整库备份任务
pub fn run(config: &BackupConfig) -> bool {
    tracing::info!("开始备份任务");
    let folder = backup_folder(&config.folder);
    tracing::debug!(
        "备份配置: identifier={}, folder={}, included={}, excluded={}, window_size={}",
        config.identifier,
        folder.display(),
        config.tables_included,
        config.tables_excluded,
        config.window_size
    );

    let mut request = BackupRequest::new(
        config.identifier.clone(),
        DataSourceOptions::MySQL(config.connection.clone()),
        folder,
    );
    request.tables = TableFilter::from_settings(&config.tables_included, &config.tables_excluded);
    request.window_size = config.window_size;

    let report = run_backup(&request, &mut StdoutProgress);

    let failed_tables: Vec<_> = report
        .export
        .tables
        .iter()
        .filter(|t| !t.is_ok())
        .collect();
    let total_rows: u64 = report.export.tables.iter().map(|t| t.rows).sum();

    if !report.succeeded() {
        print_error("fatal", &report.message);
        return false;
    }

    let archive = report.archive.as_ref();
    print_completed(serde_json::json!({
        "status": report.export.status,
        "message": report.message,
        "archive": archive.map(|a| a.archive_path.display().to_string()),
        "source_retained": archive.is_some_and(|a| a.source_retained),
        "tables": report.export.tables.len(),
        "failed_tables": failed_tables,
        "warnings": report.export.warnings,
        "total_rows": total_rows,
    }));

    if report.export.status == ExportStatus::Partial {
        tracing::warn!(
            "备份完成，但有 {} 张表导出失败，{} 条警告",
            failed_tables.len(),
            report.export.warnings.len()
        );
    }
    if let Some(a) = archive.filter(|a| a.status == ArchiveStatus::Created && a.source_retained) {
        tracing::warn!("压缩包已生成，原始脚本未能删除: {}", report.export.script_path.display());
        if let Some(e) = &a.error {
            tracing::warn!("{}", e);
        }
    }
    true
}
