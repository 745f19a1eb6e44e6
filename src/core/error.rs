//! Agent 错误类型与错误分类
//!
//! 与 RetryPolicy 配合：推理服务错误先经 classify 归为 Transient / ContextOverflow / Fatal，
//! 再决定退避重试、硬压缩后原地重试，或直接终止本次调用。
//! 工具层与解析层的错误不走这里，而是在本地吸收并转成对话内容。

use thiserror::Error;

use crate::llm::LlmError;

/// 诊断运行过程中可能出现的错误
#[derive(Error, Debug)]
pub enum AgentError {
    /// 硬压缩已到下限仍超长
    #[error("Context window exceeded: {0}")]
    ContextOverflow(String),

    /// 不可重试的推理服务错误
    #[error("Fatal service error: {0}")]
    FatalService(LlmError),

    #[error("Model call failed after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: LlmError },

    /// 调度层捕获的 worker 崩溃（CaseRunner 之外的异常）
    #[error("Worker crashed: {0}")]
    WorkerCrash(String),

    #[error("Config error: {0}")]
    ConfigError(String),

    #[error("Input error: {0}")]
    Input(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// 推理服务错误的分类结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// 连接 / 超时 / 限流 / 网关类：退避后重试
    Transient,
    /// 上下文超长：硬压缩后原地重试，不计入重试次数
    ContextOverflow,
    /// 其余错误：立即向上抛出
    Fatal,
}
