//! 案例进度事件：CaseRunner 推送给调度器聚合任务，不落盘

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressKind {
    /// 进入新一轮迭代
    Iteration,
    /// 完成门控通过
    Completed,
    /// 案例以 Incomplete 结束
    Failed,
    /// 案例以 Error 结束（含 worker 崩溃）
    Error,
}

impl ProgressKind {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ProgressKind::Iteration)
    }
}

/// 单条进度事件
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressEvent {
    pub case_id: String,
    pub kind: ProgressKind,
    /// 当前迭代数
    pub current: u32,
    /// 迭代上限
    pub total: u32,
    pub detail: Option<String>,
}

impl ProgressEvent {
    pub fn new(case_id: impl Into<String>, kind: ProgressKind, current: u32, total: u32) -> Self {
        Self {
            case_id: case_id.into(),
            kind,
            current,
            total,
            detail: None,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}
