//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `TRIAGE__*` 覆盖（双下划线表示嵌套，如 `TRIAGE__AGENT__CONCURRENCY=8`）。
//! 命令行参数最后覆盖，由 main 负责。

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::core::{OutputFormat, MAX_CONCURRENCY};
use crate::memory::BudgetSettings;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub llm: LlmSection,
    pub agent: AgentSection,
    pub data: DataSection,
    pub output: OutputSection,
    pub log: LogSection,
}

/// 模型档案：上下文窗口与默认温度
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModelProfile {
    pub context_length: usize,
    pub temperature: f32,
}

pub const DEFAULT_MODEL: &str = "deepseek-v3:671b";

/// 已知模型的档案；未知模型退回默认模型
pub fn model_profile(model: &str) -> ModelProfile {
    match model {
        "qwen3:235b" => ModelProfile {
            context_length: 40_000,
            temperature: 0.0,
        },
        "deepseek-r1:671b-0528" | DEFAULT_MODEL => ModelProfile {
            context_length: 64_000,
            temperature: 0.0,
        },
        _ => model_profile(DEFAULT_MODEL),
    }
}

/// 推理模型不接受 temperature 参数
pub fn is_reasoning_model(model: &str) -> bool {
    let lower = model.to_lowercase();
    ["r1", "qwen3", "reasoner"].iter().any(|k| lower.contains(k))
}

/// [llm] 段：后端、模型、超时与覆盖项
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmSection {
    pub provider: String,
    pub model: String,
    pub base_url: Option<String>,
    /// 存放 API Key 的环境变量名
    pub api_key_env: String,
    pub request_timeout_secs: u64,
    /// 覆盖模型档案中的上下文窗口
    pub max_context_length: Option<usize>,
    /// 覆盖模型档案中的温度
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            model: DEFAULT_MODEL.to_string(),
            base_url: None,
            api_key_env: "OPENAI_API_TOKEN".to_string(),
            request_timeout_secs: 300,
            max_context_length: None,
            temperature: None,
            max_tokens: None,
        }
    }
}

impl LlmSection {
    pub fn context_length(&self) -> usize {
        self.max_context_length
            .unwrap_or_else(|| model_profile(&self.model).context_length)
    }

    /// 实际发送的温度；推理模型为 None
    pub fn effective_temperature(&self) -> Option<f32> {
        if is_reasoning_model(&self.model) {
            return None;
        }
        Some(self.temperature.unwrap_or_else(|| model_profile(&self.model).temperature))
    }

    pub fn api_key(&self) -> Option<String> {
        std::env::var(&self.api_key_env).ok().filter(|k| !k.trim().is_empty())
    }
}

/// [agent] 段：迭代、重试、并发与上下文预算
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AgentSection {
    pub max_iterations: u32,
    pub max_model_retries: u32,
    pub retry_delay_ms: u64,
    pub early_failure_tolerance: u32,
    pub concurrency: usize,
    pub context_safety_ratio: f64,
    pub context_compress_ratio: f64,
    pub token_estimation_ratio: usize,
    pub max_tool_result_tokens: usize,
    pub tool_timeout_secs: u64,
    pub system_prompt_path: Option<PathBuf>,
}

impl Default for AgentSection {
    fn default() -> Self {
        Self {
            max_iterations: 30,
            max_model_retries: 5,
            retry_delay_ms: 2000,
            early_failure_tolerance: 3,
            concurrency: 3,
            context_safety_ratio: 0.8,
            context_compress_ratio: 0.9,
            token_estimation_ratio: 3,
            max_tool_result_tokens: 10_000,
            tool_timeout_secs: 120,
            system_prompt_path: None,
        }
    }
}

impl AgentSection {
    pub fn effective_concurrency(&self) -> usize {
        self.concurrency.clamp(1, MAX_CONCURRENCY)
    }
}

/// [data] 段：数据目录与读取上限
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DataSection {
    /// 数据根目录（其下为 processed_data/<date>/）
    pub base_path: PathBuf,
    /// 工具可读取的沙箱根目录；未设置时与 base_path 相同
    pub sandbox_root: Option<PathBuf>,
    pub default_nrows: usize,
    pub max_safe_rows: usize,
    pub max_columns: usize,
    pub fallback_nrows: usize,
    pub preview_rows: usize,
    pub max_payload_tokens: usize,
    pub priority_columns: Vec<String>,
}

impl Default for DataSection {
    fn default() -> Self {
        Self {
            base_path: PathBuf::from("data"),
            sandbox_root: None,
            default_nrows: 500,
            max_safe_rows: 1000,
            max_columns: 15,
            fallback_nrows: 200,
            preview_rows: 3,
            max_payload_tokens: 6000,
            priority_columns: ["@timestamp", "message", "level", "k8_pod", "k8_namespace"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

impl DataSection {
    pub fn effective_sandbox_root(&self) -> &Path {
        self.sandbox_root.as_deref().unwrap_or(&self.base_path)
    }
}

/// [output] 段：输入输出路径与格式
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OutputSection {
    pub input: PathBuf,
    pub path: PathBuf,
    pub format: OutputFormat,
    /// 只处理前 N 个案例
    pub limit: Option<usize>,
}

impl Default for OutputSection {
    fn default() -> Self {
        Self {
            input: PathBuf::from("input.json"),
            path: PathBuf::from("answer.jsonl"),
            format: OutputFormat::Auto,
            limit: None,
        }
    }
}

/// [log] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogSection {
    pub level: String,
}

impl Default for LogSection {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl AppConfig {
    /// 由 [llm] 与 [agent] 推导上下文预算
    pub fn budget_settings(&self) -> BudgetSettings {
        BudgetSettings {
            context_length: self.llm.context_length(),
            safety_ratio: self.agent.context_safety_ratio,
            compress_ratio: self.agent.context_compress_ratio,
            chars_per_token: self.agent.token_estimation_ratio.max(1),
        }
    }
}

/// 从 config 目录加载配置，环境变量 TRIAGE__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 TRIAGE__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        } else {
            tracing::warn!(path = %path.display(), "config file not found, skipped");
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("TRIAGE")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}
