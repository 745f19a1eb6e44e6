//! 案例诊断主循环（CaseRunner）
//!
//! Running -> {Completed, Incomplete, Error}。每轮：预算检查 -> 带重试调用模型 -> 解析工具调用 ->
//! 逐个执行并记录 AgentStep -> 完成门控通过则立即结束，否则把本轮回复与工具结果写回对话。
//! 前几轮的模型调用失败按计数容忍，超过容忍轮数后任何失败都结束案例。
//! 可选 progress 通道：向调度器聚合任务推送 Iteration / Completed / Failed / Error 事件。

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::mpsc::UnboundedSender;
use tracing::Instrument;

use crate::case::Case;
use crate::core::RetryPolicy;
use crate::llm::{CompletionParams, LlmClient};
use crate::memory::{BudgetSettings, ContextBudget, Message};
use crate::react::discovery::FileDiscovery;
use crate::react::events::{ProgressEvent, ProgressKind};
use crate::react::outcome::{AgentStep, DiagnosisOutcome, StopReason};
use crate::react::prompt::PromptBuilder;
use crate::tools::{ToolExecutor, ToolProtocol};

/// 默认每案例最大迭代数
pub const DEFAULT_MAX_ITERATIONS: u32 = 30;
/// 前 N 轮的模型调用失败不结束案例
pub const EARLY_FAILURE_TOLERANCE: u32 = 3;

const NO_DISCOVERY_HINT: &str = "No data directory configured. Use preview_table to explore data files.";

#[derive(Debug, Clone, Copy)]
pub struct RunnerSettings {
    pub max_iterations: u32,
    pub early_failure_tolerance: u32,
}

impl Default for RunnerSettings {
    fn default() -> Self {
        Self {
            max_iterations: DEFAULT_MAX_ITERATIONS,
            early_failure_tolerance: EARLY_FAILURE_TOLERANCE,
        }
    }
}

/// 单案例执行器；各组件以 Arc 共享，clone 后可交给不同 worker
#[derive(Clone)]
pub struct CaseRunner {
    llm: Arc<dyn LlmClient>,
    executor: Arc<ToolExecutor>,
    protocol: Arc<ToolProtocol>,
    prompt: Arc<PromptBuilder>,
    discovery: Option<Arc<FileDiscovery>>,
    budget: ContextBudget,
    retry: RetryPolicy,
    params: CompletionParams,
    settings: RunnerSettings,
}

fn send_event(tx: Option<&UnboundedSender<ProgressEvent>>, ev: ProgressEvent) {
    if let Some(t) = tx {
        let _ = t.send(ev);
    }
}

impl CaseRunner {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        executor: Arc<ToolExecutor>,
        protocol: Arc<ToolProtocol>,
        prompt: Arc<PromptBuilder>,
    ) -> Self {
        let budget = ContextBudget::new(&BudgetSettings::default()).with_tool_names(executor.tool_names());
        Self {
            llm,
            executor,
            protocol,
            prompt,
            discovery: None,
            budget,
            retry: RetryPolicy::default(),
            params: CompletionParams::default(),
            settings: RunnerSettings::default(),
        }
    }

    pub fn with_discovery(mut self, discovery: FileDiscovery) -> Self {
        self.discovery = Some(Arc::new(discovery));
        self
    }

    pub fn with_budget(mut self, budget: ContextBudget) -> Self {
        self.budget = budget;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_params(mut self, params: CompletionParams) -> Self {
        self.params = params;
        self
    }

    pub fn with_settings(mut self, settings: RunnerSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn settings(&self) -> &RunnerSettings {
        &self.settings
    }

    /// 运行一个案例直至终态；返回值总是携带已收集的步骤
    pub async fn run(&self, case: &Case, progress: Option<&UnboundedSender<ProgressEvent>>) -> DiagnosisOutcome {
        let span = tracing::info_span!("case", case_id = %case.short_id());
        self.run_inner(case, progress).instrument(span).await
    }

    async fn run_inner(&self, case: &Case, progress: Option<&UnboundedSender<ProgressEvent>>) -> DiagnosisOutcome {
        tracing::info!(target: "triage::diagnosis", "diagnosis started");
        let available = match &self.discovery {
            Some(d) => d.discover(&case.description),
            None => NO_DISCOVERY_HINT.to_string(),
        };
        let mut messages = self.prompt.initial_messages(case, &available);
        let mut steps: Vec<AgentStep> = Vec::new();
        let mut succeeded = 0u32;
        let mut failed = 0u32;
        let max = self.settings.max_iterations.max(1);

        for iteration in 1..=max {
            send_event(progress, ProgressEvent::new(&case.id, ProgressKind::Iteration, iteration, max));
            messages = self.budget.fit(messages);

            let started = Instant::now();
            let response = match self
                .retry
                .complete_with_retry(self.llm.as_ref(), &mut messages, &self.params, &self.budget)
                .await
            {
                Ok(text) => text,
                Err(e) => {
                    failed += 1;
                    if iteration <= self.settings.early_failure_tolerance {
                        tracing::warn!(
                            target: "triage::diagnosis",
                            iteration,
                            error = %e,
                            "model call failed during early iterations, continuing"
                        );
                        continue;
                    }
                    tracing::error!(target: "triage::diagnosis", iteration, error = %e, "model call failed, case aborted");
                    let reason = format!("model call failed at iteration {}: {}", iteration, e);
                    send_event(
                        progress,
                        ProgressEvent::new(&case.id, ProgressKind::Error, iteration, max).with_detail(&reason),
                    );
                    return DiagnosisOutcome::error(&case.id, StopReason::ModelFailure, reason, steps, iteration);
                }
            };
            succeeded += 1;
            tracing::debug!(
                target: "triage::llm",
                event = "llm_interaction",
                iteration,
                messages = messages.len(),
                response_len = response.len(),
                duration_ms = started.elapsed().as_millis() as u64,
                "model responded"
            );

            let calls = self.protocol.parse(&response);
            if calls.is_empty() {
                tracing::warn!(target: "triage::diagnosis", iteration, "no tool call detected");
                send_event(
                    progress,
                    ProgressEvent::new(&case.id, ProgressKind::Failed, iteration, max)
                        .with_detail("no tool call detected"),
                );
                return DiagnosisOutcome::incomplete(
                    &case.id,
                    StopReason::NoToolCall,
                    format!("no tool call detected at iteration {}", iteration),
                    steps,
                    iteration,
                );
            }

            let mut observations = Vec::with_capacity(calls.len());
            for call in &calls {
                let result = self.executor.execute(call).await;
                let observation = self.protocol.format(call, &result);
                steps.push(AgentStep {
                    step_number: steps.len() as u32 + 1,
                    action: call.action(),
                    observation: observation.clone(),
                    reasoning: Some(response.clone()),
                });

                if let Some(finding) = result.finding() {
                    tracing::info!(
                        target: "triage::diagnosis",
                        iteration,
                        component = %finding.component,
                        "diagnosis completed"
                    );
                    send_event(progress, ProgressEvent::new(&case.id, ProgressKind::Completed, iteration, max));
                    return DiagnosisOutcome::completed(&case.id, finding.clone(), steps, iteration);
                }
                observations.push(observation);
            }

            messages.push(Message::assistant(response));
            messages.push(Message::user(format!(
                "Tool execution results:\n{}\nContinue analysis.",
                observations.join("\n")
            )));
        }

        let failures_dominated = failed > succeeded;
        let reason = if failures_dominated {
            format!(
                "reached max iterations ({}); failed iterations ({}) outnumbered successful ones ({})",
                max, failed, succeeded
            )
        } else {
            format!("reached max iterations ({}) without completion", max)
        };
        tracing::warn!(target: "triage::diagnosis", succeeded, failed, "{}", reason);
        send_event(
            progress,
            ProgressEvent::new(&case.id, ProgressKind::Failed, max, max).with_detail(&reason),
        );
        DiagnosisOutcome::incomplete(
            &case.id,
            StopReason::MaxIterations { failures_dominated },
            reason,
            steps,
            max,
        )
    }
}
