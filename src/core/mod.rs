//! 核心编排层：错误分类与重试、批量调度、进度聚合、输入输出记录

pub mod dispatcher;
pub mod error;
pub mod progress;
pub mod records;
pub mod recovery;

pub use dispatcher::{BatchReport, BatchSummary, Dispatcher, FailureRecord, MAX_CONCURRENCY};
pub use error::{AgentError, ErrorClass};
pub use progress::{ProgressReporter, ProgressSnapshot, ProgressTracker, TracingReporter};
pub use records::{read_cases, write_findings, OutputFormat};
pub use recovery::RetryPolicy;
