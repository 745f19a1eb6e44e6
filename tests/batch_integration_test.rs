//! 批量诊断集成测试：Mock LLM + 临时目录中的表格文件

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use triage::config::AppConfig;
use triage::core::{ProgressReporter, ProgressSnapshot, RetryPolicy};
use triage::llm::{CompletionParams, LlmClient, LlmError, MockLlmClient};
use triage::memory::{BudgetSettings, ContextBudget, Message};
use triage::react::{OutcomeStatus, ProgressEvent, ProgressKind, StopReason};
use triage::{AgentComponents, AgentError, Case};

fn test_config(dir: &Path) -> AppConfig {
    let mut cfg = AppConfig::default();
    cfg.data.base_path = dir.to_path_buf();
    cfg.agent.retry_delay_ms = 0;
    cfg.agent.max_model_retries = 1;
    cfg.agent.max_iterations = 5;
    cfg.agent.system_prompt_path = Some(dir.join("no-such-prompt.txt"));
    cfg
}

fn write_metrics(dir: &Path) {
    let mut csv = String::from("time,pod,cpu\n");
    for i in 0..20 {
        csv.push_str(&format!("2025-06-06 10:{:02}:00,pod-{},{}\n", i, i % 3, i * 5));
    }
    std::fs::write(dir.join("metrics.csv"), csv).unwrap();
}

/// 从任务提示中取出案例 ID
fn case_id_of(messages: &[Message]) -> String {
    messages
        .iter()
        .find_map(|m| {
            m.content
                .lines()
                .find_map(|l| l.strip_prefix("Fault Case UUID: "))
                .map(|s| s.trim().to_string())
        })
        .unwrap_or_default()
}

fn completion_for(id: &str) -> String {
    format!(
        "<attempt_completion><result>{{\"uuid\": \"{id}\", \"component\": \"checkoutservice\", \
         \"reason\": \"memory leak\", \"time\": \"2025-06-06 10:05:00\", \
         \"reasoning_trace\": [{{\"step\": 1, \"action\": \"query_table\", \"observation\": \"oom\"}}]}}</result>\
         </attempt_completion>"
    )
}

fn cases(n: usize) -> Vec<Case> {
    (0..n)
        .map(|i| Case::new(format!("case-{i:02}"), format!("anomaly {i}")))
        .collect()
}

#[derive(Default)]
struct CollectingReporter {
    events: Mutex<Vec<ProgressEvent>>,
    finished: Mutex<Option<ProgressSnapshot>>,
}

impl ProgressReporter for CollectingReporter {
    fn on_event(&self, event: &ProgressEvent, _snapshot: &ProgressSnapshot) {
        self.events.lock().unwrap().push(event.clone());
    }

    fn on_finish(&self, snapshot: &ProgressSnapshot) {
        *self.finished.lock().unwrap() = Some(snapshot.clone());
    }
}

#[tokio::test]
async fn test_batch_counts_with_failing_cases() {
    let dir = tempfile::tempdir().unwrap();
    let mock = MockLlmClient::new(|messages, _| {
        let id = case_id_of(messages);
        if id == "case-03" || id == "case-07" {
            Ok("I cannot decide which tool to use.".to_string())
        } else {
            Ok(completion_for(&id))
        }
    });
    let components = AgentComponents::from_config(&test_config(dir.path()), Arc::new(mock));
    let reporter = Arc::new(CollectingReporter::default());
    let report = components
        .dispatcher()
        .with_reporter(reporter.clone())
        .run_all(cases(10))
        .await;

    assert_eq!(report.summary.total, 10);
    assert_eq!(report.summary.successful, 8);
    assert_eq!(report.summary.failed, 2);
    assert_eq!(report.summary.categories.get("no_tool_call"), Some(&2));
    let failed: Vec<&str> = report.summary.failures.iter().map(|f| f.case_id.as_str()).collect();
    assert_eq!(failed, vec!["case-03", "case-07"]);

    for (i, finding) in report.findings.iter().enumerate() {
        assert_eq!(finding.id, format!("case-{i:02}"));
    }
    assert!(report.findings[3].is_placeholder());
    assert_eq!(report.findings[0].component, "checkoutservice");

    let terminal = reporter
        .events
        .lock()
        .unwrap()
        .iter()
        .filter(|e| e.kind.is_terminal())
        .count();
    assert_eq!(terminal, 10);
    let finished = reporter.finished.lock().unwrap().clone().unwrap();
    assert_eq!(finished.finished, 10);
    assert_eq!(finished.successful, 8);
}

#[tokio::test]
async fn test_concurrency_never_exceeds_limit() {
    let dir = tempfile::tempdir().unwrap();
    let mock = MockLlmClient::new(|messages, _| Ok(completion_for(&case_id_of(messages))))
        .with_delay(Duration::from_millis(30));
    let observer = mock.clone();
    let mut cfg = test_config(dir.path());
    cfg.agent.concurrency = 3;

    let report = AgentComponents::from_config(&cfg, Arc::new(mock))
        .dispatcher()
        .run_all(cases(9))
        .await;

    assert_eq!(report.summary.successful, 9);
    assert_eq!(report.summary.concurrency, 3);
    assert!(observer.max_in_flight() <= 3);
    assert!(observer.max_in_flight() >= 2);
    assert_eq!(observer.calls(), 9);
}

#[tokio::test]
async fn test_query_then_complete_through_fallback() {
    let dir = tempfile::tempdir().unwrap();
    write_metrics(dir.path());
    // 第一轮查询带不存在的过滤列，执行器降级后返回数据；第二轮提交结论
    let mock = MockLlmClient::new(|messages, _| {
        let id = case_id_of(messages);
        let saw_results = messages.iter().any(|m| m.content.contains("Tool execution results"));
        if saw_results {
            Ok(completion_for(&id))
        } else {
            Ok("Check cpu first.\n<query_table><file_path>metrics.csv</file_path>\
                <read_options>{'filters': [('phantom', '==', 1)], 'nrows': 50}</read_options></query_table>"
                .to_string())
        }
    });
    let components = AgentComponents::from_config(&test_config(dir.path()), Arc::new(mock));
    let outcome = components.runner.run(&Case::new("case-q", "cpu spike"), None).await;

    assert_eq!(outcome.status, OutcomeStatus::Completed);
    assert_eq!(outcome.iterations, 2);
    assert_eq!(outcome.steps.len(), 2);
    assert!(outcome.steps[0].observation.contains("fallback tier 1 was used"));
    assert!(outcome.steps[0].observation.contains("Data shape: (20 rows x 3 columns)"));
    assert_eq!(outcome.result.unwrap().id, "case-q");
}

#[tokio::test]
async fn test_model_failures_end_case_and_batch_continues() {
    let dir = tempfile::tempdir().unwrap();
    let mock = MockLlmClient::new(|messages, _| {
        let id = case_id_of(messages);
        if id == "case-01" {
            Err(LlmError::Unavailable("503 service unavailable".to_string()))
        } else {
            Ok(completion_for(&id))
        }
    });
    let report = AgentComponents::from_config(&test_config(dir.path()), Arc::new(mock))
        .dispatcher()
        .run_all(cases(3))
        .await;

    assert_eq!(report.summary.successful, 2);
    let bad = &report.outcomes[1];
    assert_eq!(bad.status, OutcomeStatus::Error);
    assert_eq!(bad.stop_reason, Some(StopReason::ModelFailure));
    assert_eq!(bad.iterations, 4);
    assert!(report.findings[1].is_placeholder());
}

#[tokio::test]
async fn test_retry_bound_is_max_plus_one() {
    let mock = MockLlmClient::failing(LlmError::Timeout("read timeout".to_string()));
    let policy = RetryPolicy::new(3, Duration::ZERO);
    let budget = ContextBudget::new(&BudgetSettings::default());
    let mut messages = vec![Message::system("s"), Message::user("u")];

    let err = policy
        .complete_with_retry(&mock, &mut messages, &CompletionParams::default(), &budget)
        .await
        .unwrap_err();

    assert!(matches!(err, AgentError::RetriesExhausted { attempts: 4, .. }));
    assert_eq!(mock.calls(), 4);
    assert_eq!(mock.model_name(), "mock");
}

#[tokio::test]
async fn test_iteration_events_precede_terminal_event() {
    let dir = tempfile::tempdir().unwrap();
    let mock = MockLlmClient::always("no tools here");
    let components = AgentComponents::from_config(&test_config(dir.path()), Arc::new(mock));
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let outcome = components.runner.run(&Case::new("case-e", "d"), Some(&tx)).await;
    drop(tx);

    let mut kinds = Vec::new();
    while let Some(ev) = rx.recv().await {
        kinds.push(ev.kind);
    }
    assert_eq!(outcome.stop_reason, Some(StopReason::NoToolCall));
    assert_eq!(kinds, vec![ProgressKind::Iteration, ProgressKind::Failed]);
}

#[tokio::test]
async fn test_data_override_reads_discovered_files() {
    let dir = tempfile::tempdir().unwrap();
    let day = dir.path().join("processed_data/2025-06-06/pod");
    std::fs::create_dir_all(&day).unwrap();
    std::fs::write(day.join("pod_cpu.csv"), "time,pod,cpu\n2025-06-06 10:00:00,cart-0,97\n").unwrap();

    // 与 --data 相同：只覆盖 base_path，沙箱根目录随之变化
    let mut cfg = AppConfig::default();
    cfg.data.base_path = dir.path().to_path_buf();
    cfg.agent.retry_delay_ms = 0;
    cfg.agent.system_prompt_path = Some(dir.path().join("no-such-prompt.txt"));

    let mock = MockLlmClient::new(|messages, _| {
        let id = case_id_of(messages);
        if messages.iter().any(|m| m.content.contains("Tool execution results")) {
            return Ok(completion_for(&id));
        }
        let listed = messages
            .iter()
            .flat_map(|m| m.content.lines())
            .find_map(|l| l.strip_prefix("- ").filter(|p| p.ends_with("pod_cpu.csv")))
            .map(str::to_string)
            .unwrap_or_default();
        Ok(format!("<preview_table><file_path>{listed}</file_path></preview_table>"))
    });
    let components = AgentComponents::from_config(&cfg, Arc::new(mock));
    let case = Case::new("case-d", "cpu spike from 2025-06-06T10:00:00Z to 2025-06-06T10:30:00Z");
    let outcome = components.runner.run(&case, None).await;

    assert_eq!(outcome.status, OutcomeStatus::Completed);
    let observation = &outcome.steps[0].observation;
    assert!(observation.contains("pod_cpu.csv"));
    assert!(observation.contains("Shape: (1 rows x 3 columns)"), "{observation}");
}
