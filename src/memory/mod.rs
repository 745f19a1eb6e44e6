//! 记忆层：单案例对话消息与上下文预算（估算 / 软压缩 / 硬压缩）

pub mod conversation;
pub mod token_budget;

pub use conversation::{Message, Role};
pub use token_budget::{BudgetSettings, ContextBudget, TokenEstimator, DIGEST_PREFIX, HARD_FLOOR};
