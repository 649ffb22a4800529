use std::env;
use std::fs;
use std::io::stdout;
use std::path::{Path, PathBuf};
use std::process::exit;

use serde::{Deserialize, Serialize};
use tracing_appender::{non_blocking, rolling::never};
use tracing_subscriber::{EnvFilter, fmt::layer, layer::SubscriberExt, util::SubscriberInitExt};

use sqlbak_core::{DEFAULT_WINDOW_SIZE, MySQLOptions, ProgressSink, Stage, task_dir};

mod backup;
mod package;

/// 操作类型
#[derive(Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Backup,  // 导出整库并压缩
    Package, // 重新压缩已有脚本
}

/// 备份配置
#[derive(Deserialize)]
pub struct BackupConfig {
    pub identifier: String,
    #[serde(default = "default_folder")]
    pub folder: String,
    #[serde(default = "default_tables_included")]
    pub tables_included: String,
    #[serde(default = "default_tables_excluded")]
    pub tables_excluded: String,
    #[serde(default = "default_window_size")]
    pub window_size: usize,
    pub connection: MySQLOptions,
}

fn default_folder() -> String {
    "backup".into()
}

fn default_tables_included() -> String {
    "all".into()
}

fn default_tables_excluded() -> String {
    "none".into()
}

fn default_window_size() -> usize {
    DEFAULT_WINDOW_SIZE
}

/// 压缩配置
#[derive(Debug, Deserialize)]
pub struct PackageConfig {
    pub file: String,
}

/// 统一的任务配置
#[derive(Deserialize)]
pub struct TaskConfig {
    pub task_id: String,
    pub operation: Operation,
    pub created_at: String,

    // 各操作的配置（可选，根据 operation 字段确定使用哪一个）
    #[serde(default)]
    pub backup: Option<BackupConfig>,
    #[serde(default)]
    pub package: Option<PackageConfig>,
}

/// 进度输出消息（写入 stdout 的 JSON Lines）
#[derive(Debug, Serialize)]
pub struct ProgressMessage {
    kind: MessageKind,
    data: serde_json::Value,
}

/// 消息类型
#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Progress,
    Error,
    Completed,
}

/// 将导出阶段输出为 progress 消息
pub struct StdoutProgress;

impl ProgressSink for StdoutProgress {
    fn on_stage(
        &mut self,
        stage: Stage,
        detail: &str,
    ) {
        print_progress(ProgressMessage {
            kind: MessageKind::Progress,
            data: serde_json::json!({
                "stage": stage,
                "label": stage.label(),
                "detail": detail,
            }),
        });
    }
}

/// 初始化任务日志系统
fn init_task_logging(task_dir: &Path) -> non_blocking::WorkerGuard {
    let log_file = never(task_dir, "task.log");
    let (non_blocking, guard) = non_blocking(log_file);

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(layer().with_writer(stdout))
        .with(layer().with_writer(non_blocking).with_ansi(false))
        .init();

    guard
}

fn main() {
    // 1. 解析命令行参数；--task-id 对应 ~/.sqlbak/tasks/{task_id}
    let args: Vec<String> = env::args().collect();
    let arg_value = |name: &str| {
        args.iter()
            .position(|arg| arg == name)
            .and_then(|i| args.get(i + 1))
            .cloned()
    };
    let task_dir = arg_value("--task-dir")
        .map(PathBuf::from)
        .or_else(|| arg_value("--task-id").map(|id| task_dir(&id)));
    let task_dir = match task_dir {
        Some(dir) => dir,
        None => {
            print_error("fatal", "缺少 --task-dir 或 --task-id 参数");
            eprintln!("用法: sqlbak-task --task-dir <DIR> | --task-id <ID>");
            exit(1);
        }
    };

    // 2. 初始化日志系统
    if let Err(e) = fs::create_dir_all(&task_dir) {
        print_error("fatal", &format!("无法创建任务目录: {}", e));
        exit(1);
    }
    let _log_guard = init_task_logging(&task_dir);
    tracing::info!("任务进程启动，task_dir: {:?}", task_dir);

    // 3. 读取任务配置
    let config_path = task_dir.join("config.json");
    let config_content = match fs::read_to_string(&config_path) {
        Ok(content) => content,
        Err(e) => {
            print_error("fatal", &format!("无法读取配置文件: {}", e));
            exit(1);
        }
    };

    // 4. 解析统一的任务配置
    let config: TaskConfig = match serde_json::from_str(&config_content) {
        Ok(cfg) => cfg,
        Err(e) => {
            print_error("fatal", &format!("配置文件格式错误: {}", e));
            exit(1);
        }
    };
    tracing::info!(
        "任务配置解析成功: task_id={}, operation={:?}, created_at={}",
        config.task_id,
        config.operation,
        config.created_at
    );

    // 5. 根据 operation 分发处理
    let succeeded = match config.operation {
        Operation::Backup => match config.backup.as_ref() {
            Some(backup_config) => backup::run(backup_config),
            None => {
                print_error("fatal", "Backup 配置缺失");
                exit(1);
            }
        },
        Operation::Package => match config.package.as_ref() {
            Some(package_config) => package::run(package_config),
            None => {
                print_error("fatal", "Package 配置缺失");
                exit(1);
            }
        },
    };

    if !succeeded {
        exit(1);
    }
}

pub fn print_error(
    severity: &str,
    message: &str,
) {
    print_progress(ProgressMessage {
        kind: MessageKind::Error,
        data: serde_json::json!({
            "severity": severity,
            "message": message,
        }),
    });
}

pub fn print_completed(data: serde_json::Value) {
    print_progress(ProgressMessage {
        kind: MessageKind::Completed,
        data,
    });
}

pub fn print_progress(msg: ProgressMessage) {
    if let Ok(json) = serde_json::to_string(&msg) {
        println!("{}", json);
    }
}
