//! 组件装配
//!
//! 由 AppConfig 一次性构建诊断所需的全部组件（LLM、工具注册表与执行器、协议、预算、重试、提示词、文件发现），
//! 每个组件只拿到自己需要的配置，没有进程级全局状态。

use std::sync::Arc;
use std::time::Duration;

use crate::config::AppConfig;
use crate::core::{AgentError, Dispatcher, RetryPolicy};
use crate::llm::{CompletionParams, LlmClient, MockLlmClient, OpenAiClient};
use crate::memory::ContextBudget;
use crate::react::{CaseRunner, FileDiscovery, PromptBuilder, RunnerSettings};
use crate::tools::{
    CompletionTool, FileTableReader, ParameterValidator, PreviewTableTool, QueryTableTool, TableReader,
    ToolExecutor, ToolProtocol, ToolRegistry, ValidatorSettings,
};

/// 工具参数中按字面量映射解析的参数名
pub const MAPPING_PARAM: &str = "read_options";

/// 预构建的诊断组件，可在多个 worker 间共享
pub struct AgentComponents {
    pub runner: CaseRunner,
    pub executor: Arc<ToolExecutor>,
    pub concurrency: usize,
}

/// 按 [llm].provider 创建推理客户端
pub fn create_llm_from_config(cfg: &AppConfig) -> Result<Arc<dyn LlmClient>, AgentError> {
    match cfg.llm.provider.to_lowercase().as_str() {
        "openai" => {
            let api_key = cfg.llm.api_key();
            if api_key.is_none() {
                tracing::warn!(env = %cfg.llm.api_key_env, "API key not set, sending unauthenticated requests");
            }
            tracing::info!(target: "triage::llm", model = %cfg.llm.model, "Using OpenAI-compatible LLM");
            Ok(Arc::new(OpenAiClient::new(
                cfg.llm.base_url.as_deref(),
                &cfg.llm.model,
                api_key.as_deref(),
                cfg.llm.request_timeout_secs,
            )))
        }
        "mock" => {
            tracing::warn!(target: "triage::llm", "Using Mock LLM, every case will end without a tool call");
            Ok(Arc::new(MockLlmClient::always("No analysis available.")))
        }
        other => Err(AgentError::ConfigError(format!(
            "unknown llm provider '{}', expected openai or mock",
            other
        ))),
    }
}

/// 注册预览 / 查询 / 完成三个工具，数据读取限定在沙箱根目录
pub fn build_registry(cfg: &AppConfig, reader: Arc<dyn TableReader>) -> ToolRegistry {
    let mut tools = ToolRegistry::new();
    tools.register(PreviewTableTool::new(reader.clone(), cfg.data.preview_rows, MAPPING_PARAM));
    tools.register(QueryTableTool::new(reader, cfg.data.max_payload_tokens, MAPPING_PARAM));
    tools.register(CompletionTool::new());
    tools
}

impl AgentComponents {
    pub fn from_config(cfg: &AppConfig, llm: Arc<dyn LlmClient>) -> Self {
        let reader: Arc<dyn TableReader> = Arc::new(FileTableReader::new(cfg.data.effective_sandbox_root()));
        Self::with_reader(cfg, llm, reader)
    }

    /// 使用指定的数据读取实现装配
    pub fn with_reader(cfg: &AppConfig, llm: Arc<dyn LlmClient>, reader: Arc<dyn TableReader>) -> Self {
        let registry = build_registry(cfg, reader);

        let validator = ParameterValidator::new(ValidatorSettings {
            default_nrows: cfg.data.default_nrows,
            max_safe_rows: cfg.data.max_safe_rows,
            max_columns: cfg.data.max_columns,
            priority_columns: cfg.data.priority_columns.clone(),
        });
        let budget = ContextBudget::new(&cfg.budget_settings()).with_tool_names(registry.tool_names());
        let protocol = ToolProtocol::new(registry.tool_names(), MAPPING_PARAM)
            .with_result_limit(cfg.agent.max_tool_result_tokens, budget.estimator())
            .with_sample_rows(cfg.data.preview_rows);
        let prompt = PromptBuilder::load(cfg.agent.system_prompt_path.as_deref(), &registry, MAPPING_PARAM);
        let executor = Arc::new(
            ToolExecutor::new(registry, validator, cfg.agent.tool_timeout_secs)
                .with_mapping_param(MAPPING_PARAM)
                .with_fallback_nrows(cfg.data.fallback_nrows),
        );

        let params = CompletionParams {
            temperature: cfg.llm.effective_temperature(),
            max_tokens: cfg.llm.max_tokens,
        };
        let runner = CaseRunner::new(llm, executor.clone(), Arc::new(protocol), Arc::new(prompt))
            .with_discovery(FileDiscovery::new(&cfg.data.base_path, cfg.data.preview_rows))
            .with_budget(budget)
            .with_retry(RetryPolicy::new(
                cfg.agent.max_model_retries,
                Duration::from_millis(cfg.agent.retry_delay_ms),
            ))
            .with_params(params)
            .with_settings(RunnerSettings {
                max_iterations: cfg.agent.max_iterations,
                early_failure_tolerance: cfg.agent.early_failure_tolerance,
            });

        tracing::info!(
            model = %cfg.llm.model,
            context_tokens = cfg.llm.context_length(),
            max_iterations = cfg.agent.max_iterations,
            concurrency = cfg.agent.effective_concurrency(),
            "components ready"
        );

        Self {
            runner,
            executor,
            concurrency: cfg.agent.effective_concurrency(),
        }
    }

    pub fn dispatcher(&self) -> Dispatcher {
        Dispatcher::new(self.runner.clone(), self.concurrency)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_has_three_tools() {
        let cfg = AppConfig::default();
        let llm: Arc<dyn LlmClient> = Arc::new(MockLlmClient::always("x"));
        let components = AgentComponents::from_config(&cfg, llm);
        assert_eq!(
            components.executor.tool_names(),
            vec!["attempt_completion", "preview_table", "query_table"]
        );
        assert_eq!(components.dispatcher().concurrency(), 3);
    }

    #[test]
    fn test_unknown_provider_rejected() {
        let mut cfg = AppConfig::default();
        cfg.llm.provider = "carrier-pigeon".to_string();
        assert!(matches!(create_llm_from_config(&cfg), Err(AgentError::ConfigError(_))));
        cfg.llm.provider = "mock".to_string();
        assert_eq!(create_llm_from_config(&cfg).unwrap().model_name(), "mock");
    }
}
