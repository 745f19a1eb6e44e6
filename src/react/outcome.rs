//! 案例诊断结果模型

use serde::Serialize;

use crate::case::Finding;

/// 单步审计记录；编号在案例内严格递增且连续
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentStep {
    pub step_number: u32,
    pub action: String,
    pub observation: String,
    pub reasoning: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    Completed,
    Incomplete,
    Error,
}

/// 非 Completed 结束的原因类别（汇总统计用）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    NoToolCall,
    MaxIterations { failures_dominated: bool },
    ModelFailure,
    WorkerCrash,
}

impl StopReason {
    /// 直方图分类名
    pub fn category(&self) -> &'static str {
        match self {
            StopReason::NoToolCall => "no_tool_call",
            StopReason::MaxIterations { .. } => "max_iterations",
            StopReason::ModelFailure => "model_failure",
            StopReason::WorkerCrash => "worker_crash",
        }
    }
}

/// CaseRunner 的终态返回值；返回后不再修改
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiagnosisOutcome {
    pub case_id: String,
    pub status: OutcomeStatus,
    pub result: Option<Finding>,
    pub steps: Vec<AgentStep>,
    pub iterations: u32,
    pub reason: Option<String>,
    pub stop_reason: Option<StopReason>,
}

impl DiagnosisOutcome {
    pub fn completed(case_id: impl Into<String>, finding: Finding, steps: Vec<AgentStep>, iterations: u32) -> Self {
        Self {
            case_id: case_id.into(),
            status: OutcomeStatus::Completed,
            result: Some(finding),
            steps,
            iterations,
            reason: None,
            stop_reason: None,
        }
    }

    pub fn incomplete(
        case_id: impl Into<String>,
        stop: StopReason,
        reason: impl Into<String>,
        steps: Vec<AgentStep>,
        iterations: u32,
    ) -> Self {
        Self {
            case_id: case_id.into(),
            status: OutcomeStatus::Incomplete,
            result: None,
            steps,
            iterations,
            reason: Some(reason.into()),
            stop_reason: Some(stop),
        }
    }

    pub fn error(
        case_id: impl Into<String>,
        stop: StopReason,
        reason: impl Into<String>,
        steps: Vec<AgentStep>,
        iterations: u32,
    ) -> Self {
        Self {
            case_id: case_id.into(),
            status: OutcomeStatus::Error,
            result: None,
            steps,
            iterations,
            reason: Some(reason.into()),
            stop_reason: Some(stop),
        }
    }

    /// worker 崩溃时由调度器合成
    pub fn crashed(case_id: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::error(case_id, StopReason::WorkerCrash, detail, Vec::new(), 0)
    }

    pub fn is_success(&self) -> bool {
        self.status == OutcomeStatus::Completed && self.result.is_some()
    }
}
