//! 上下文预算：token 估算与对话压缩
//!
//! - 软压缩：估算 token 超过阈值时，保留前 2 条（system + 初始任务）与最近 4 条，中间替换为一条分类摘要。
//! - 硬压缩：推理服务明确返回上下文超长时使用，只保留第 1 条与最近 2 条；已不超过 3 条时无法再压缩。

use crate::memory::{Message, Role};

/// 摘要消息前缀，用于识别已压缩过的历史
pub const DIGEST_PREFIX: &str = "[Compressed history]";

/// 软压缩保留的头部消息数（system + 初始任务）
const SOFT_KEEP_HEAD: usize = 2;
/// 软压缩保留的尾部消息数
const SOFT_KEEP_TAIL: usize = 4;
/// 少于此条数时软压缩直接返回
const SOFT_MIN_MESSAGES: usize = 4;
/// 硬压缩的下限：不超过此条数时不再压缩，超长错误升级为致命
pub const HARD_FLOOR: usize = 3;

/// Token 估算器：字符数 / 固定比例
#[derive(Debug, Clone, Copy)]
pub struct TokenEstimator {
    chars_per_token: usize,
}

impl TokenEstimator {
    pub fn new(chars_per_token: usize) -> Self {
        Self {
            chars_per_token: chars_per_token.max(1),
        }
    }

    pub fn estimate_text(&self, text: &str) -> usize {
        text.chars().count() / self.chars_per_token
    }

    /// 先累加所有消息内容字符数再整除
    pub fn estimate_messages(&self, messages: &[Message]) -> usize {
        let chars: usize = messages.iter().map(Message::char_len).sum();
        chars / self.chars_per_token
    }
}

impl Default for TokenEstimator {
    fn default() -> Self {
        Self::new(3)
    }
}

/// 上下文预算配置
#[derive(Debug, Clone)]
pub struct BudgetSettings {
    /// 模型上下文窗口（tokens）
    pub context_length: usize,
    /// 安全余量比例：可用 token = context_length * safety_ratio
    pub safety_ratio: f64,
    /// 压缩阈值比例：阈值 = 可用 token * compress_ratio
    pub compress_ratio: f64,
    pub chars_per_token: usize,
}

impl Default for BudgetSettings {
    fn default() -> Self {
        Self {
            context_length: 64_000,
            safety_ratio: 0.8,
            compress_ratio: 0.9,
            chars_per_token: 3,
        }
    }
}

/// 上下文预算管理器
#[derive(Debug, Clone)]
pub struct ContextBudget {
    estimator: TokenEstimator,
    max_context_tokens: usize,
    compress_threshold: usize,
    /// 摘要时识别的工具名（出现即计入对应类别）
    tool_names: Vec<String>,
}

impl ContextBudget {
    pub fn new(settings: &BudgetSettings) -> Self {
        let max_context_tokens = (settings.context_length as f64 * settings.safety_ratio) as usize;
        let compress_threshold = (max_context_tokens as f64 * settings.compress_ratio) as usize;
        Self {
            estimator: TokenEstimator::new(settings.chars_per_token),
            max_context_tokens,
            compress_threshold,
            tool_names: Vec::new(),
        }
    }

    /// 设置摘要时统计的工具名
    pub fn with_tool_names(mut self, names: impl IntoIterator<Item = String>) -> Self {
        self.tool_names = names.into_iter().collect();
        self.tool_names.sort();
        self
    }

    pub fn estimator(&self) -> TokenEstimator {
        self.estimator
    }

    pub fn max_context_tokens(&self) -> usize {
        self.max_context_tokens
    }

    pub fn compress_threshold(&self) -> usize {
        self.compress_threshold
    }

    pub fn estimate(&self, messages: &[Message]) -> usize {
        self.estimator.estimate_messages(messages)
    }

    /// 调用模型前的预算检查：超过阈值则软压缩，否则原样返回
    pub fn fit(&self, messages: Vec<Message>) -> Vec<Message> {
        let before = self.estimate(&messages);
        if before <= self.compress_threshold {
            return messages;
        }
        let compressed = self.compress(&messages);
        tracing::warn!(
            target: "triage::diagnosis",
            before_tokens = before,
            after_tokens = self.estimate(&compressed),
            before_messages = messages.len(),
            after_messages = compressed.len(),
            "context compressed"
        );
        compressed
    }

    /// 软压缩：保留前 2 条与最近 4 条，中间替换为一条 assistant 摘要
    pub fn compress(&self, messages: &[Message]) -> Vec<Message> {
        if messages.len() < SOFT_MIN_MESSAGES {
            return messages.to_vec();
        }
        let head_end = SOFT_KEEP_HEAD.min(messages.len());
        let tail_start = messages.len().saturating_sub(SOFT_KEEP_TAIL).max(head_end);
        let middle = &messages[head_end..tail_start];

        // 中间只剩一条旧摘要时视为已压缩
        if middle.is_empty() || (middle.len() == 1 && is_digest(&middle[0])) {
            return messages.to_vec();
        }

        let mut out = Vec::with_capacity(SOFT_KEEP_HEAD + 1 + SOFT_KEEP_TAIL);
        out.extend_from_slice(&messages[..head_end]);
        out.push(Message::assistant(self.digest(middle)));
        out.extend_from_slice(&messages[tail_start..]);
        out
    }

    /// 硬压缩：只保留第 1 条与最近 2 条；已处于下限时返回 None
    pub fn compress_hard(&self, messages: &[Message]) -> Option<Vec<Message>> {
        if messages.len() <= HARD_FLOOR {
            return None;
        }
        let mut out = Vec::with_capacity(HARD_FLOOR);
        out.push(messages[0].clone());
        out.extend_from_slice(&messages[messages.len() - 2..]);
        Some(out)
    }

    /// 粗粒度分类摘要：调用过哪些工具（次数）、是否出现过错误
    fn digest(&self, middle: &[Message]) -> String {
        let mut counts: Vec<(&str, usize)> = self.tool_names.iter().map(|n| (n.as_str(), 0)).collect();
        let mut saw_error = false;
        let mut carried = 0usize;

        for msg in middle {
            if is_digest(msg) {
                carried += 1;
            }
            for (name, count) in counts.iter_mut() {
                if msg.role == Role::Assistant && msg.content.contains(&format!("<{}>", name)) {
                    *count += 1;
                }
            }
            let lower = msg.content.to_lowercase();
            if lower.contains("error") || lower.contains("failed") {
                saw_error = true;
            }
        }

        let used: Vec<String> = counts
            .iter()
            .filter(|(_, c)| *c > 0)
            .map(|(n, c)| format!("{} x{}", n, c))
            .collect();
        let tools = if used.is_empty() {
            "none".to_string()
        } else {
            used.join(", ")
        };
        let mut text = format!(
            "{} {} earlier messages omitted; tools used: {}; errors encountered: {}",
            DIGEST_PREFIX,
            middle.len(),
            tools,
            if saw_error { "yes" } else { "no" }
        );
        if carried > 0 {
            text.push_str("; includes an earlier compressed section");
        }
        text
    }
}

fn is_digest(msg: &Message) -> bool {
    msg.role == Role::Assistant && msg.content.starts_with(DIGEST_PREFIX)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn budget(context_length: usize) -> ContextBudget {
        ContextBudget::new(&BudgetSettings {
            context_length,
            ..BudgetSettings::default()
        })
        .with_tool_names(vec!["preview_table".to_string(), "query_table".to_string()])
    }

    fn conversation(n: usize) -> Vec<Message> {
        let mut msgs = vec![Message::system("sys"), Message::user("task")];
        for i in 2..n {
            if i % 2 == 0 {
                msgs.push(Message::assistant(format!(
                    "step {i}\n<query_table><file_path>a.csv</file_path></query_table>"
                )));
            } else {
                msgs.push(Message::user(format!("Tool execution results {i}")));
            }
        }
        msgs
    }

    #[test]
    fn test_estimate_sums_then_divides() {
        let b = budget(64_000);
        let msgs = vec![Message::user("ab"), Message::user("cd")];
        // 4 chars / 3 = 1
        assert_eq!(b.estimate(&msgs), 1);
    }

    #[test]
    fn test_thresholds_follow_ratios() {
        let b = budget(10_000);
        assert_eq!(b.max_context_tokens(), 8_000);
        assert_eq!(b.compress_threshold(), 7_200);
    }

    #[test]
    fn test_fit_below_threshold_is_unchanged() {
        let b = budget(64_000);
        let msgs = conversation(12);
        assert_eq!(b.fit(msgs.clone()), msgs);
    }

    #[test]
    fn test_fit_compresses_over_threshold() {
        let b = budget(10);
        let msgs = conversation(12);
        let out = b.fit(msgs.clone());
        assert_eq!(out.len(), 7);
        assert_eq!(out[..2], msgs[..2]);
        assert_eq!(out[3..], msgs[8..]);
    }

    #[test]
    fn test_compress_short_history_unchanged() {
        let b = budget(10);
        let msgs = conversation(3);
        assert_eq!(b.compress(&msgs), msgs);
    }

    #[test]
    fn test_compress_digest_lists_tools_and_errors() {
        let b = budget(10);
        let mut msgs = conversation(10);
        msgs[5] = Message::user("Error: File not found");
        let out = b.compress(&msgs);
        let digest = &out[2].content;
        assert!(digest.starts_with(DIGEST_PREFIX));
        assert!(digest.contains("query_table x2"));
        assert!(digest.contains("errors encountered: yes"));
    }

    #[test]
    fn test_compress_idempotent_at_six_messages() {
        let b = budget(10);
        let msgs = conversation(6);
        let once = b.compress(&msgs);
        assert_eq!(once, msgs);
        assert_eq!(b.compress(&once), once);
    }

    #[test]
    fn test_compress_idempotent_after_digest() {
        let b = budget(10);
        let once = b.compress(&conversation(14));
        let twice = b.compress(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_hard_compress_keeps_first_and_last_two() {
        let b = budget(10);
        let msgs = conversation(8);
        let out = b.compress_hard(&msgs).unwrap();
        assert_eq!(out.len(), 3);
        assert_eq!(out[0], msgs[0]);
        assert_eq!(out[1..], msgs[6..]);
    }

    #[test]
    fn test_hard_compress_at_floor_is_none() {
        let b = budget(10);
        assert!(b.compress_hard(&conversation(3)).is_none());
        assert!(b.compress_hard(&conversation(2)).is_none());
    }
}
