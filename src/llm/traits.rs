//! LLM 客户端抽象
//!
//! 推理服务对诊断循环而言是一个不透明的 `complete(messages, params) -> text`；
//! 所有后端（OpenAI 兼容 / Mock）实现 LlmClient，错误统一为 LlmError 以便 RetryPolicy 分类。

use async_trait::async_trait;
use thiserror::Error;

use crate::memory::Message;

/// 单次推理调用参数
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompletionParams {
    /// 生成温度；None 表示不下发（推理型模型会忽略或拒绝该参数）
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

/// 推理服务错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LlmError {
    #[error("Request timeout: {0}")]
    Timeout(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Rate limit exceeded: {0}")]
    RateLimited(String),

    /// 5xx / 网关类
    #[error("Service unavailable: {0}")]
    Unavailable(String),

    #[error("Context length exceeded: {0}")]
    ContextLength(String),

    #[error("API error: {0}")]
    Api(String),
}

const CONTEXT_SIGNATURES: &[&str] = &[
    "context length",
    "context_length",
    "maximum context",
    "context window",
    "too many tokens",
    "token limit",
    "prompt is too long",
];
const RATE_LIMIT_SIGNATURES: &[&str] = &["rate limit", "rate_limit", "too many requests", "429"];
const UNAVAILABLE_SIGNATURES: &[&str] = &[
    "server error",
    "service unavailable",
    "bad gateway",
    "gateway timeout",
    "internal error",
    "502",
    "503",
    "504",
];
const TIMEOUT_SIGNATURES: &[&str] = &["timeout", "timed out", "read timeout", "write timeout"];
const CONNECTION_SIGNATURES: &[&str] = &[
    "connection",
    "ssl",
    "network",
    "dns error",
    "broken pipe",
    "reset by peer",
];

impl LlmError {
    /// 按错误文本特征归类；后端只拿得到字符串时使用
    pub fn from_message(msg: impl Into<String>) -> Self {
        let msg = msg.into();
        let lower = msg.to_lowercase();
        let has = |sigs: &[&str]| sigs.iter().any(|s| lower.contains(s));

        if has(CONTEXT_SIGNATURES) {
            LlmError::ContextLength(msg)
        } else if has(RATE_LIMIT_SIGNATURES) {
            LlmError::RateLimited(msg)
        } else if has(UNAVAILABLE_SIGNATURES) {
            LlmError::Unavailable(msg)
        } else if has(TIMEOUT_SIGNATURES) {
            LlmError::Timeout(msg)
        } else if has(CONNECTION_SIGNATURES) {
            LlmError::Connection(msg)
        } else {
            LlmError::Api(msg)
        }
    }

    /// 连接 / 超时类：退避时使用更大的倍数
    pub fn is_connection_class(&self) -> bool {
        matches!(self, LlmError::Timeout(_) | LlmError::Connection(_))
    }
}

/// LLM 客户端 trait
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// 非流式完成
    async fn complete(
        &self,
        messages: &[Message],
        params: &CompletionParams,
    ) -> Result<String, LlmError>;

    /// 模型名（日志用）
    fn model_name(&self) -> &str {
        "unknown"
    }

    /// 获取累计 token 使用统计：(prompt_tokens, completion_tokens, total_tokens)
    /// 默认返回 (0, 0, 0)，具体实现可覆盖
    fn token_usage(&self) -> (u64, u64, u64) {
        (0, 0, 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_message_context_length() {
        let e = LlmError::from_message("This model's maximum context length is 65536 tokens");
        assert!(matches!(e, LlmError::ContextLength(_)));
    }

    #[test]
    fn test_from_message_transient_kinds() {
        assert!(matches!(
            LlmError::from_message("HTTP 429 Too Many Requests"),
            LlmError::RateLimited(_)
        ));
        assert!(matches!(
            LlmError::from_message("502 Bad Gateway"),
            LlmError::Unavailable(_)
        ));
        assert!(matches!(
            LlmError::from_message("Gateway Timeout"),
            LlmError::Unavailable(_)
        ));
        assert!(matches!(
            LlmError::from_message("operation timed out"),
            LlmError::Timeout(_)
        ));
        assert!(matches!(
            LlmError::from_message("Connection refused"),
            LlmError::Connection(_)
        ));
    }

    #[test]
    fn test_from_message_other_is_api() {
        let e = LlmError::from_message("invalid api key");
        assert!(matches!(e, LlmError::Api(_)));
        assert!(!e.is_connection_class());
    }
}
