use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Started,
    Connected,
    IntrospectionComplete,
    TableComplete,
    ViewsComplete,
    RoutinesComplete,
    ExportComplete,
    PackagingStarted,
    PackagingComplete,
    Failed,
}

impl Stage {
    pub fn label(&self) -> &'static str {
        match self {
            Stage::Started => "任务已开始",
            Stage::Connected => "数据库已连接",
            Stage::IntrospectionComplete => "结构分析完成",
            Stage::TableComplete => "表导出完成",
            Stage::ViewsComplete => "视图导出完成",
            Stage::RoutinesComplete => "存储过程导出完成",
            Stage::ExportComplete => "脚本导出完成",
            Stage::PackagingStarted => "正在压缩文件",
            Stage::PackagingComplete => "备份完成",
            Stage::Failed => "任务失败",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Stage::PackagingComplete | Stage::Failed)
    }
}

/// 进度回调，在导出线程上同步调用，实现方不能长时间阻塞
pub trait ProgressSink {
    fn on_stage(
        &mut self,
        stage: Stage,
        detail: &str,
    );
}

/// 忽略所有进度
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn on_stage(
        &mut self,
        _stage: Stage,
        _detail: &str,
    ) {
    }
}

impl<F> ProgressSink for F
where
    F: FnMut(Stage, &str),
{
    fn on_stage(
        &mut self,
        stage: Stage,
        detail: &str,
    ) {
        self(stage, detail)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct JobProgress {
    pub stage: Stage,
    pub detail: String,
    pub updated_at: DateTime<Utc>,
}

impl JobProgress {
    fn new(
        stage: Stage,
        detail: &str,
    ) -> Self {
        Self {
            stage,
            detail: detail.to_string(),
            updated_at: Utc::now(),
        }
    }
}

type Jobs = Arc<RwLock<HashMap<String, JobProgress>>>;

/// 按任务 id 保存进度
///
/// start 创建条目，调用方取走结果后用 collect 移除，条目不会自动过期。
#[derive(Clone, Default)]
pub struct ProgressStore {
    jobs: Jobs,
}

impl ProgressStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 登记新任务并返回其进度句柄
    pub fn start(&self) -> ProgressHandle {
        let id = Uuid::new_v4().to_string();
        write_jobs(&self.jobs).insert(id.clone(), JobProgress::new(Stage::Started, ""));
        ProgressHandle {
            id,
            jobs: self.jobs.clone(),
        }
    }

    pub fn get(
        &self,
        id: &str,
    ) -> Option<JobProgress> {
        read_jobs(&self.jobs).get(id).cloned()
    }

    /// 取出并移除任务进度
    pub fn collect(
        &self,
        id: &str,
    ) -> Option<JobProgress> {
        write_jobs(&self.jobs).remove(id)
    }

    pub fn len(&self) -> usize {
        read_jobs(&self.jobs).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// 单个任务的进度句柄，可移动到工作线程
#[derive(Clone)]
pub struct ProgressHandle {
    id: String,
    jobs: Jobs,
}

impl ProgressHandle {
    pub fn id(&self) -> &str {
        &self.id
    }
}

impl ProgressSink for ProgressHandle {
    fn on_stage(
        &mut self,
        stage: Stage,
        detail: &str,
    ) {
        // 已被 collect 的任务不再写回
        if let Some(entry) = write_jobs(&self.jobs).get_mut(&self.id) {
            *entry = JobProgress::new(stage, detail);
        }
    }
}

fn read_jobs(jobs: &Jobs) -> RwLockReadGuard<'_, HashMap<String, JobProgress>> {
    jobs.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write_jobs(jobs: &Jobs) -> RwLockWriteGuard<'_, HashMap<String, JobProgress>> {
    jobs.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}
