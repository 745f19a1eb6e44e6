//! Triage - 微服务故障根因诊断智能体
//!
//! 模块划分：
//! - **agent**: 由配置装配全部诊断组件
//! - **case**: 故障案例与诊断结论
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误分类与重试、批量调度、进度聚合、输入输出
//! - **llm**: LLM 客户端抽象与实现（OpenAI 兼容 / Mock）
//! - **memory**: 对话消息与上下文预算
//! - **react**: 单案例 ReAct 诊断循环、文件发现、提示词
//! - **tools**: 工具协议、注册表与带降级的执行器

pub mod agent;
pub mod case;
pub mod config;
pub mod core;
pub mod llm;
pub mod memory;
pub mod observability;
pub mod react;
pub mod tools;

pub use agent::{create_llm_from_config, AgentComponents};
pub use case::{Case, Finding, TraceStep};
pub use config::{load_config, AppConfig};
pub use core::{AgentError, BatchReport, Dispatcher};
pub use react::{CaseRunner, DiagnosisOutcome};
