//! 诊断层：CaseRunner 主循环、进度事件、结果模型、数据文件发现与提示词

pub mod discovery;
pub mod events;
pub mod loop_;
pub mod outcome;
pub mod prompt;

pub use discovery::FileDiscovery;
pub use events::{ProgressEvent, ProgressKind};
pub use loop_::{CaseRunner, RunnerSettings, DEFAULT_MAX_ITERATIONS, EARLY_FAILURE_TOLERANCE};
pub use outcome::{AgentStep, DiagnosisOutcome, OutcomeStatus, StopReason};
pub use prompt::{default_system_prompt, PromptBuilder};
