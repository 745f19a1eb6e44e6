//! 重试策略
//!
//! 推理服务错误按 ErrorClass 分流：Transient 退避后重试（计数），ContextOverflow 硬压缩后
//! 原地重试（不计数，到下限即终止），Fatal 立即返回。

use std::time::Duration;

use crate::core::{AgentError, ErrorClass};
use crate::llm::{CompletionParams, LlmClient, LlmError};
use crate::memory::{ContextBudget, Message};

/// 推理调用的重试策略
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_retries: u32,
    base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
        }
    }

    pub fn classify(&self, err: &LlmError) -> ErrorClass {
        match err {
            LlmError::ContextLength(_) => ErrorClass::ContextOverflow,
            LlmError::Timeout(_)
            | LlmError::Connection(_)
            | LlmError::RateLimited(_)
            | LlmError::Unavailable(_) => ErrorClass::Transient,
            LlmError::Api(_) => ErrorClass::Fatal,
        }
    }

    /// 第 attempt 次重试（从 1 开始）前的等待时间
    pub fn backoff_delay(&self, attempt: u32, err: &LlmError) -> Duration {
        if err.is_connection_class() {
            self.base_delay * (attempt + 1) * 2
        } else {
            self.base_delay * attempt
        }
    }

    /// 带重试地调用推理服务
    ///
    /// 硬压缩直接作用于 `messages`，调用方后续轮次沿用压缩后的历史。
    pub async fn complete_with_retry(
        &self,
        llm: &dyn LlmClient,
        messages: &mut Vec<Message>,
        params: &CompletionParams,
        budget: &ContextBudget,
    ) -> Result<String, AgentError> {
        let mut retries = 0u32;

        loop {
            let err = match llm.complete(messages, params).await {
                Ok(text) => {
                    if retries > 0 {
                        tracing::info!(target: "triage::llm", retries, "model call recovered");
                    }
                    return Ok(text);
                }
                Err(e) => e,
            };

            match self.classify(&err) {
                ErrorClass::ContextOverflow => match budget.compress_hard(messages) {
                    Some(compressed) => {
                        tracing::warn!(
                            target: "triage::llm",
                            before = messages.len(),
                            after = compressed.len(),
                            error = %err,
                            "context rejected by service, hard-compressing"
                        );
                        *messages = compressed;
                    }
                    None => {
                        tracing::error!(target: "triage::llm", error = %err, "context at floor, cannot compress further");
                        return Err(AgentError::ContextOverflow(err.to_string()));
                    }
                },
                ErrorClass::Fatal => {
                    tracing::error!(target: "triage::llm", error = %err, "non-retryable model error");
                    return Err(AgentError::FatalService(err));
                }
                ErrorClass::Transient => {
                    retries += 1;
                    if retries > self.max_retries {
                        tracing::error!(
                            target: "triage::llm",
                            attempts = retries,
                            error = %err,
                            "model retries exhausted"
                        );
                        return Err(AgentError::RetriesExhausted {
                            attempts: retries,
                            last: err,
                        });
                    }
                    let delay = self.backoff_delay(retries, &err);
                    tracing::warn!(
                        target: "triage::llm",
                        attempt = retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "model call failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(5, Duration::from_millis(2000))
    }
}
