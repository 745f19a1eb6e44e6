//! 可观测性
//!
//! 日志输出到 stderr，stdout 留给进度条与结果。`RUST_LOG` 优先于配置中的级别。

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// 由级别字符串构建过滤器；非法值退回 info
pub fn env_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

pub fn init(level: &str) {
    let _ = tracing_subscriber::registry()
        .with(env_filter(level))
        .with(fmt::layer().with_writer(std::io::stderr).with_target(true))
        .try_init();
}
