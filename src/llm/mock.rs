//! Mock LLM 客户端（用于测试，无需 API）
//!
//! 响应由脚本函数决定：入参为本次消息列表与调用序号（从 0 开始），
//! 同时记录调用次数与同时在途的最大调用数，便于断言重试上限与并发上限。

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::llm::{CompletionParams, LlmClient, LlmError};
use crate::memory::Message;

type Script = dyn Fn(&[Message], usize) -> Result<String, LlmError> + Send + Sync;

/// 可编排的 Mock 客户端
#[derive(Clone)]
pub struct MockLlmClient {
    script: Arc<Script>,
    delay: Duration,
    calls: Arc<AtomicUsize>,
    in_flight: Arc<AtomicUsize>,
    max_in_flight: Arc<AtomicUsize>,
}

impl MockLlmClient {
    pub fn new<F>(script: F) -> Self
    where
        F: Fn(&[Message], usize) -> Result<String, LlmError> + Send + Sync + 'static,
    {
        Self {
            script: Arc::new(script),
            delay: Duration::ZERO,
            calls: Arc::new(AtomicUsize::new(0)),
            in_flight: Arc::new(AtomicUsize::new(0)),
            max_in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// 每次都返回同一段文本
    pub fn always(text: impl Into<String>) -> Self {
        let text = text.into();
        Self::new(move |_, _| Ok(text.clone()))
    }

    /// 每次都返回同一个错误
    pub fn failing(err: LlmError) -> Self {
        Self::new(move |_, _| Err(err.clone()))
    }

    /// 按顺序返回；用尽后重复最后一项
    pub fn sequence(responses: Vec<Result<String, LlmError>>) -> Self {
        Self::new(move |_, idx| match responses.get(idx).or_else(|| responses.last()) {
            Some(r) => r.clone(),
            None => Err(LlmError::Api("mock script is empty".to_string())),
        })
    }

    /// 每次调用前等待，用于制造并发重叠
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// 观测到的最大同时在途调用数
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    fn model_name(&self) -> &str {
        "mock"
    }

    async fn complete(
        &self,
        messages: &[Message],
        _params: &CompletionParams,
    ) -> Result<String, LlmError> {
        let idx = self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let result = (self.script)(messages, idx);

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_sequence_repeats_last() {
        let mock = MockLlmClient::sequence(vec![Ok("a".into()), Ok("b".into())]);
        let p = CompletionParams::default();
        assert_eq!(mock.complete(&[], &p).await.unwrap(), "a");
        assert_eq!(mock.complete(&[], &p).await.unwrap(), "b");
        assert_eq!(mock.complete(&[], &p).await.unwrap(), "b");
        assert_eq!(mock.calls(), 3);
        assert_eq!(mock.max_in_flight(), 1);
    }

    #[tokio::test]
    async fn test_failing_returns_error() {
        let mock = MockLlmClient::failing(LlmError::Connection("refused".into()));
        let err = mock
            .complete(&[], &CompletionParams::default())
            .await
            .unwrap_err();
        assert!(err.is_connection_class());
    }
}
