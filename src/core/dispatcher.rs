//! 批量调度器
//!
//! 固定数量的 worker 从共享队列领取 `(index, Case)`，各自运行 CaseRunner，
//! 结果写入按 index 预分配的槽位，输出顺序与完成顺序无关。
//! 每个案例在独立 task 中运行，panic 转为 WorkerCrash 结果，不影响其他案例。
//! 进度事件经 mpsc 通道汇入单个聚合任务，由 ProgressReporter 展示。

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::future::join_all;
use serde::Serialize;
use tokio::sync::{mpsc, Mutex};

use crate::case::{Case, Finding};
use crate::core::error::AgentError;
use crate::core::progress::{ProgressReporter, ProgressSnapshot, ProgressTracker, TracingReporter};
use crate::react::{CaseRunner, DiagnosisOutcome, OutcomeStatus, ProgressEvent, ProgressKind};

/// 并发上限
pub const MAX_CONCURRENCY: usize = 32;

/// 未成功案例的记录
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailureRecord {
    pub index: usize,
    pub case_id: String,
    pub status: OutcomeStatus,
    pub reason: String,
}

/// 批量汇总统计
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchSummary {
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    /// 成功率（百分比）
    pub success_rate: f64,
    pub elapsed: Duration,
    pub cases_per_sec: f64,
    pub concurrency: usize,
    pub failures: Vec<FailureRecord>,
    /// 失败类别直方图
    pub categories: BTreeMap<String, usize>,
}

/// run_all 的返回：逐案例结果、补齐后的结论、汇总
#[derive(Debug, Clone)]
pub struct BatchReport {
    pub outcomes: Vec<DiagnosisOutcome>,
    /// 与输入一一对应；未完成案例为占位结论
    pub findings: Vec<Finding>,
    pub summary: BatchSummary,
    pub progress: ProgressSnapshot,
}

pub struct Dispatcher {
    runner: CaseRunner,
    concurrency: usize,
    reporter: Arc<dyn ProgressReporter>,
}

impl Dispatcher {
    pub fn new(runner: CaseRunner, concurrency: usize) -> Self {
        Self {
            runner,
            concurrency: concurrency.clamp(1, MAX_CONCURRENCY),
            reporter: Arc::new(TracingReporter),
        }
    }

    pub fn with_reporter(mut self, reporter: Arc<dyn ProgressReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// 运行全部案例；输出长度与顺序与输入一致
    pub async fn run_all(&self, cases: Vec<Case>) -> BatchReport {
        let started = Instant::now();
        let total = cases.len();
        let ids: Vec<String> = cases.iter().map(|c| c.id.clone()).collect();
        tracing::info!(target: "triage::summary", total, concurrency = self.concurrency, "batch started");

        let queue: Arc<Mutex<VecDeque<(usize, Case)>>> =
            Arc::new(Mutex::new(cases.into_iter().enumerate().collect()));
        let slots: Arc<Mutex<Vec<Option<DiagnosisOutcome>>>> = Arc::new(Mutex::new(vec![None; total]));

        let (tx, mut rx) = mpsc::unbounded_channel::<ProgressEvent>();
        let reporter = self.reporter.clone();
        let aggregator = tokio::spawn(async move {
            let mut tracker = ProgressTracker::new(total);
            while let Some(ev) = rx.recv().await {
                tracker.record(&ev);
                reporter.on_event(&ev, &tracker.snapshot());
            }
            tracker.snapshot()
        });

        let workers = (0..self.concurrency.min(total)).map(|worker| {
            let queue = queue.clone();
            let slots = slots.clone();
            let tx = tx.clone();
            let runner = self.runner.clone();
            async move {
                loop {
                    let next = queue.lock().await.pop_front();
                    let Some((index, case)) = next else {
                        break;
                    };
                    let outcome = run_isolated(runner.clone(), case, tx.clone(), worker).await;
                    slots.lock().await[index] = Some(outcome);
                }
            }
        });
        join_all(workers).await;
        drop(tx);

        let progress = match aggregator.await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                tracing::warn!(target: "triage::summary", error = %e, "progress aggregator stopped");
                ProgressTracker::new(total).snapshot()
            }
        };
        self.reporter.on_finish(&progress);

        let outcomes: Vec<DiagnosisOutcome> = std::mem::take(&mut *slots.lock().await)
            .into_iter()
            .zip(ids.iter())
            .map(|(slot, id)| slot.unwrap_or_else(|| DiagnosisOutcome::crashed(id, "case was never scheduled")))
            .collect();
        let findings = backfill_findings(&outcomes, &ids);
        let summary = summarize(&outcomes, started.elapsed(), self.concurrency);
        tracing::info!(
            target: "triage::summary",
            total = summary.total,
            successful = summary.successful,
            failed = summary.failed,
            success_rate = %format!("{:.1}%", summary.success_rate),
            elapsed_secs = summary.elapsed.as_secs_f64(),
            cases_per_sec = %format!("{:.2}", summary.cases_per_sec),
            "batch summary"
        );

        BatchReport {
            outcomes,
            findings,
            summary,
            progress,
        }
    }
}

/// 在独立 task 中运行单个案例，panic 转为 Error 结果
async fn run_isolated(
    runner: CaseRunner,
    case: Case,
    tx: mpsc::UnboundedSender<ProgressEvent>,
    worker: usize,
) -> DiagnosisOutcome {
    let case_id = case.id.clone();
    let events = tx.clone();
    let handle = tokio::spawn(async move { runner.run(&case, Some(&events)).await });
    match handle.await {
        Ok(outcome) => outcome,
        Err(e) => {
            let detail = AgentError::WorkerCrash(format!("worker {}: {}", worker, e)).to_string();
            tracing::error!(target: "triage::summary", case_id = %case_id, error = %e, "worker crashed");
            let _ = tx.send(ProgressEvent::new(&case_id, ProgressKind::Error, 0, 0).with_detail(&detail));
            DiagnosisOutcome::crashed(case_id, detail)
        }
    }
}

/// 每个输入位置都有一条结论；id 以输入为准
pub fn backfill_findings(outcomes: &[DiagnosisOutcome], ids: &[String]) -> Vec<Finding> {
    outcomes
        .iter()
        .zip(ids)
        .map(|(outcome, id)| match &outcome.result {
            Some(found) if outcome.status == OutcomeStatus::Completed => {
                let mut finding = found.clone();
                if finding.id != *id {
                    tracing::warn!(
                        target: "triage::summary",
                        expected = %id,
                        got = %finding.id,
                        "finding id differs from case id, overriding"
                    );
                    finding.id = id.clone();
                }
                finding
            }
            _ => Finding::placeholder(id.clone()),
        })
        .collect()
}

pub fn summarize(outcomes: &[DiagnosisOutcome], elapsed: Duration, concurrency: usize) -> BatchSummary {
    let total = outcomes.len();
    let successful = outcomes.iter().filter(|o| o.is_success()).count();
    let mut failures = Vec::new();
    let mut categories: BTreeMap<String, usize> = BTreeMap::new();
    for (index, outcome) in outcomes.iter().enumerate() {
        if outcome.is_success() {
            continue;
        }
        let category = outcome
            .stop_reason
            .map(|s| s.category())
            .unwrap_or("unknown");
        *categories.entry(category.to_string()).or_insert(0) += 1;
        failures.push(FailureRecord {
            index,
            case_id: outcome.case_id.clone(),
            status: outcome.status,
            reason: outcome.reason.clone().unwrap_or_default(),
        });
    }
    let secs = elapsed.as_secs_f64();
    BatchSummary {
        total,
        successful,
        failed: total - successful,
        success_rate: if total == 0 {
            0.0
        } else {
            successful as f64 / total as f64 * 100.0
        },
        elapsed,
        cases_per_sec: if secs > 0.0 { total as f64 / secs } else { 0.0 },
        concurrency,
        failures,
        categories,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::RetryPolicy;
    use crate::llm::{LlmError, MockLlmClient};
    use crate::react::{PromptBuilder, StopReason};
    use crate::tools::{CompletionTool, ParameterValidator, ToolExecutor, ToolProtocol, ToolRegistry};

    fn completion_for(case_id: &str) -> String {
        format!(
            "<attempt_completion><result>{{\"uuid\": \"{}\", \"component\": \"svc\", \"reason\": \"oom\", \
             \"time\": \"2025-06-06 10:00:00\", \"reasoning_trace\": \
             [{{\"step\": 1, \"action\": \"a\", \"observation\": \"o\"}}]}}</result></attempt_completion>",
            case_id
        )
    }

    /// 从任务提示词中取出案例 id
    fn case_id_of(messages: &[crate::memory::Message]) -> String {
        messages
            .iter()
            .find_map(|m| {
                m.content
                    .lines()
                    .find_map(|l| l.strip_prefix("Fault Case UUID: "))
                    .map(str::to_string)
            })
            .unwrap_or_default()
    }

    fn runner(llm: MockLlmClient) -> CaseRunner {
        let mut registry = ToolRegistry::new();
        registry.register(CompletionTool::new());
        let protocol = Arc::new(ToolProtocol::new(registry.tool_names(), "read_options"));
        let executor = Arc::new(ToolExecutor::new(registry, ParameterValidator::default(), 5));
        CaseRunner::new(Arc::new(llm), executor, protocol, Arc::new(PromptBuilder::new("sys")))
            .with_retry(RetryPolicy::new(0, Duration::ZERO))
    }

    fn cases(n: usize) -> Vec<Case> {
        (0..n).map(|i| Case::new(format!("case-{i}"), format!("fault {i}"))).collect()
    }

    #[tokio::test]
    async fn test_order_preserved_under_uneven_latency() {
        let llm = MockLlmClient::new(|msgs, _| {
            let id = case_id_of(msgs);
            // 让编号小的案例更慢
            let n: u64 = id.trim_start_matches("case-").parse().unwrap_or(0);
            std::thread::sleep(Duration::from_millis(20u64.saturating_sub(n * 2)));
            Ok(completion_for(&id))
        });
        let report = Dispatcher::new(runner(llm), 4).run_all(cases(8)).await;
        let ids: Vec<&str> = report.findings.iter().map(|f| f.id.as_str()).collect();
        let expected: Vec<String> = (0..8).map(|i| format!("case-{i}")).collect();
        assert_eq!(ids, expected.iter().map(String::as_str).collect::<Vec<_>>());
        assert_eq!(report.summary.successful, 8);
        assert_eq!(report.progress.finished, 8);
    }

    #[tokio::test]
    async fn test_panicking_case_becomes_placeholder() {
        let llm = MockLlmClient::new(|msgs, _| {
            let id = case_id_of(msgs);
            if id == "case-1" {
                panic!("runner exploded");
            }
            Ok(completion_for(&id))
        });
        let report = Dispatcher::new(runner(llm), 2).run_all(cases(3)).await;
        assert_eq!(report.outcomes.len(), 3);
        assert_eq!(report.outcomes[1].stop_reason, Some(StopReason::WorkerCrash));
        let reason = report.outcomes[1].reason.clone().unwrap_or_default();
        assert!(reason.starts_with("Worker crashed: worker "), "{reason}");
        assert!(report.findings[1].is_placeholder());
        assert_eq!(report.findings[1].id, "case-1");
        assert_eq!(report.summary.categories.get("worker_crash"), Some(&1));
        assert_eq!(report.summary.successful, 2);
    }

    #[tokio::test]
    async fn test_mismatched_finding_id_is_forced() {
        let llm = MockLlmClient::always(completion_for("someone-else"));
        let report = Dispatcher::new(runner(llm), 1).run_all(cases(2)).await;
        assert_eq!(report.findings[0].id, "case-0");
        assert_eq!(report.findings[1].id, "case-1");
        assert_eq!(report.outcomes[0].result.as_ref().unwrap().id, "someone-else");
    }

    #[tokio::test]
    async fn test_empty_batch() {
        let llm = MockLlmClient::failing(LlmError::Api("unused".into()));
        let report = Dispatcher::new(runner(llm), 3).run_all(Vec::new()).await;
        assert!(report.outcomes.is_empty());
        assert_eq!(report.summary.total, 0);
    }

    #[test]
    fn test_concurrency_clamped() {
        let llm = MockLlmClient::always("x");
        assert_eq!(Dispatcher::new(runner(llm.clone()), 0).concurrency(), 1);
        assert_eq!(Dispatcher::new(runner(llm), 500).concurrency(), MAX_CONCURRENCY);
    }
}
