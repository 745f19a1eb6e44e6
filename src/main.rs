//! Triage - 微服务故障根因诊断智能体
//!
//! 入口：加载配置、读取案例、并发运行诊断循环并写出结论。

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use triage::core::{read_cases, write_findings, OutputFormat, ProgressReporter, ProgressSnapshot};
use triage::react::ProgressEvent;
use triage::{create_llm_from_config, load_config, observability, AgentComponents};

/// 命令行参数；未给出的项沿用配置文件与环境变量
#[derive(Debug, Parser)]
#[command(name = "triage", version, about = "Batch root-cause diagnosis for microservice faults")]
struct Cli {
    /// 额外的配置文件
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// 案例输入（JSON 数组或 JSON Lines）
    #[arg(short, long)]
    input: Option<PathBuf>,

    /// 结论输出路径
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// auto / json / jsonl
    #[arg(long)]
    format: Option<OutputFormat>,

    #[arg(long)]
    concurrency: Option<usize>,

    #[arg(long)]
    max_iterations: Option<u32>,

    #[arg(long)]
    max_retries: Option<u32>,

    /// 覆盖模型上下文窗口（tokens）
    #[arg(long)]
    context_length: Option<usize>,

    #[arg(long)]
    temperature: Option<f32>,

    #[arg(long)]
    model: Option<String>,

    /// 数据根目录
    #[arg(long)]
    data: Option<PathBuf>,

    /// 只处理前 N 个案例
    #[arg(long)]
    limit: Option<usize>,

    #[arg(long)]
    log_level: Option<String>,

    /// 关闭进度条，只输出日志
    #[arg(long)]
    no_progress: bool,
}

/// 终端进度条：终态事件推进，迭代事件只刷新消息
struct BarReporter {
    bar: ProgressBar,
}

impl BarReporter {
    fn new(total: usize) -> Self {
        let bar = ProgressBar::new(total as u64);
        bar.set_style(
            ProgressStyle::default_bar()
                .template("{spinner} [{elapsed_precise}] {bar:40} {pos}/{len} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar()),
        );
        Self { bar }
    }
}

impl ProgressReporter for BarReporter {
    fn on_event(&self, event: &ProgressEvent, snapshot: &ProgressSnapshot) {
        if event.kind.is_terminal() {
            self.bar.set_position(snapshot.finished as u64);
        }
        let eta = snapshot
            .eta
            .map(|d| format!("{}s", d.as_secs()))
            .unwrap_or_else(|| "-".to_string());
        self.bar.set_message(format!(
            "ok {} | failed {} | {:.2}/s | eta {} | {} {}/{}",
            snapshot.successful,
            snapshot.failed,
            snapshot.throughput,
            eta,
            triage::case::short_id(&event.case_id),
            event.current,
            event.total
        ));
    }

    fn on_finish(&self, snapshot: &ProgressSnapshot) {
        self.bar.finish_with_message(format!(
            "done: {} ok, {} failed in {:.1}s",
            snapshot.successful,
            snapshot.failed,
            snapshot.elapsed.as_secs_f64()
        ));
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut cfg = load_config(cli.config.clone()).context("Failed to load configuration")?;
    apply_overrides(&mut cfg, &cli);
    observability::init(&cfg.log.level);

    let mut cases = read_cases(&cfg.output.input)
        .with_context(|| format!("Failed to read cases from {}", cfg.output.input.display()))?;
    if let Some(limit) = cfg.output.limit {
        cases.truncate(limit);
    }
    tracing::info!(
        target: "triage::summary",
        input = %cfg.output.input.display(),
        cases = cases.len(),
        "cases loaded"
    );

    let llm = create_llm_from_config(&cfg).context("Failed to create LLM client")?;
    let components = AgentComponents::from_config(&cfg, llm.clone());
    let mut dispatcher = components.dispatcher();
    if !cli.no_progress {
        dispatcher = dispatcher.with_reporter(Arc::new(BarReporter::new(cases.len())));
    }

    let report = dispatcher.run_all(cases).await;

    write_findings(&cfg.output.path, &report.findings, cfg.output.format)
        .with_context(|| format!("Failed to write findings to {}", cfg.output.path.display()))?;

    let s = &report.summary;
    let (prompt_tokens, completion_tokens, total_tokens) = llm.token_usage();
    tracing::info!(
        target: "triage::llm",
        model = %llm.model_name(),
        prompt_tokens,
        completion_tokens,
        total_tokens,
        "token usage"
    );
    for (category, count) in &s.categories {
        tracing::info!(target: "triage::summary", category = %category, count, "failure category");
    }
    for f in &s.failures {
        tracing::warn!(
            target: "triage::summary",
            index = f.index,
            case_id = %f.case_id,
            status = ?f.status,
            reason = %f.reason,
            "case not completed"
        );
    }

    Ok(())
}

fn apply_overrides(cfg: &mut triage::AppConfig, cli: &Cli) {
    if let Some(ref p) = cli.input {
        cfg.output.input = p.clone();
    }
    if let Some(ref p) = cli.output {
        cfg.output.path = p.clone();
    }
    if let Some(format) = cli.format {
        cfg.output.format = format;
    }
    if let Some(n) = cli.concurrency {
        cfg.agent.concurrency = n;
    }
    if let Some(n) = cli.max_iterations {
        cfg.agent.max_iterations = n;
    }
    if let Some(n) = cli.max_retries {
        cfg.agent.max_model_retries = n;
    }
    if let Some(n) = cli.context_length {
        cfg.llm.max_context_length = Some(n);
    }
    if let Some(t) = cli.temperature {
        cfg.llm.temperature = Some(t);
    }
    if let Some(ref m) = cli.model {
        cfg.llm.model = m.clone();
    }
    if let Some(ref p) = cli.data {
        cfg.data.base_path = p.clone();
    }
    if let Some(n) = cli.limit {
        cfg.output.limit = Some(n);
    }
    if let Some(ref level) = cli.log_level {
        cfg.log.level = level.clone();
    }
}
