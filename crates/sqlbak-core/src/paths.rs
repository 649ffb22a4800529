use std::fs::create_dir_all;
use std::path::{Component, Path, PathBuf};

use chrono::NaiveDateTime;

/// 获取 sqlbak 根目录（~/.sqlbak）
///
/// Fallback: 如果 home_dir 失败，使用 ./.sqlbak
pub fn root_dir() -> PathBuf {
    dirs::home_dir()
        .map(|home| home.join(".sqlbak"))
        .unwrap_or_else(|| PathBuf::from(".sqlbak"))
}

/// 获取任务根目录（~/.sqlbak/tasks）
pub fn tasks_dir() -> PathBuf {
    let dir = root_dir().join("tasks");
    let _ = create_dir_all(&dir);
    dir
}

/// 获取指定任务的目录（~/.sqlbak/tasks/{task_id}）
pub fn task_dir(id: &str) -> PathBuf {
    let dir = tasks_dir().join(id);
    let _ = create_dir_all(&dir);
    dir
}

/// 脚本文件名：{identifier}_{yyyy-MM-dd-HH-mm-ss}.sql
pub fn script_name(
    identifier: &str,
    at: NaiveDateTime,
) -> String {
    format!("{}_{}.sql", identifier.trim(), at.format("%Y-%m-%d-%H-%M-%S"))
}

/// 与脚本同名的压缩包文件名
pub fn archive_name(script_name: &str) -> String {
    let base = script_name.strip_suffix(".sql").unwrap_or(script_name);
    format!("{}.zip", base)
}

/// 解析备份目录设置；相对路径基于 data_dir
pub fn resolve_backup_folder(
    setting: &str,
    data_dir: &Path,
) -> PathBuf {
    let setting = setting.trim();
    let setting = setting.strip_prefix("./").unwrap_or(setting);
    if setting.is_empty() {
        return data_dir.join("backup");
    }

    let path = Path::new(setting);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        data_dir.join(path)
    }
}

/// 备份目录（相对路径基于 ~/.sqlbak）
pub fn backup_folder(setting: &str) -> PathBuf {
    resolve_backup_folder(setting, &root_dir())
}

/// 按文件标识查找备份目录中的压缩包
///
/// file_id 只能是单个文件名，可带 .sql 后缀；含路径分隔符、`..` 或绝对路径时返回 None。
pub fn locate_archive(
    folder: &Path,
    file_id: &str,
) -> Option<PathBuf> {
    let file_id = file_id.trim();
    let base = file_id.strip_suffix(".sql").unwrap_or(file_id);
    if base.is_empty() || base.contains(['/', '\\']) {
        return None;
    }

    let name = archive_name(base);
    let mut components = Path::new(&name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => {}
        _ => return None,
    }

    let path = folder.join(&name);
    if !path.is_file() {
        return None;
    }

    // 符号链接可能指向目录之外
    let real_folder = folder.canonicalize().ok()?;
    let real_path = path.canonicalize().ok()?;
    (real_path.parent() == Some(real_folder.as_path())).then_some(path)
}
