use std::path::Path;

use sqlbak_core::{ArchiveStatus, package};

use crate::{PackageConfig, print_completed, print_error};

/// 手动重新压缩已有脚本
pub fn run(config: &PackageConfig) -> bool {
    tracing::info!("开始压缩任务: {}", config.file);
    let result = package(Path::new(&config.file));

    match result.status {
        ArchiveStatus::Created | ArchiveStatus::Skipped => {
            print_completed(serde_json::json!({
                "status": result.status,
                "archive": result.archive_path.display().to_string(),
                "source_retained": result.source_retained,
                "warning": result.error.as_ref().map(|e| e.to_string()),
            }));
            true
        }
        ArchiveStatus::NotFound => {
            print_error("fatal", &format!("脚本不存在: {}", config.file));
            false
        }
        ArchiveStatus::Failed => {
            let reason = result
                .error
                .as_ref()
                .map(|e| e.to_string())
                .unwrap_or_default();
            print_error("fatal", &format!("压缩失败: {}", reason));
            false
        }
    }
}
