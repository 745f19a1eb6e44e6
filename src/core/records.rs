//! 案例输入与结论输出
//!
//! 输入支持 JSON 数组或 JSON Lines；输出为格式化 JSON 数组或 JSON Lines，顺序与输入一致。

use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::case::{Case, Finding};
use crate::core::AgentError;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// 按扩展名决定：`.jsonl` 为 JSON Lines，其余为 JSON 数组
    #[default]
    Auto,
    Json,
    Jsonl,
}

impl OutputFormat {
    pub fn resolve(self, path: &Path) -> OutputFormat {
        match self {
            OutputFormat::Auto => {
                let is_jsonl = path
                    .extension()
                    .and_then(|e| e.to_str())
                    .is_some_and(|e| e.eq_ignore_ascii_case("jsonl"));
                if is_jsonl {
                    OutputFormat::Jsonl
                } else {
                    OutputFormat::Json
                }
            }
            other => other,
        }
    }
}

impl FromStr for OutputFormat {
    type Err = AgentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "auto" => Ok(OutputFormat::Auto),
            "json" => Ok(OutputFormat::Json),
            "jsonl" | "ndjson" => Ok(OutputFormat::Jsonl),
            other => Err(AgentError::ConfigError(format!(
                "unknown output format '{}', expected auto, json or jsonl",
                other
            ))),
        }
    }
}

/// 读取案例列表
pub fn read_cases(path: &Path) -> Result<Vec<Case>, AgentError> {
    let text = std::fs::read_to_string(path)?;
    parse_cases(&text).map_err(|e| AgentError::Input(format!("{}: {}", path.display(), e)))
}

pub fn parse_cases(text: &str) -> Result<Vec<Case>, String> {
    let trimmed = text.trim_start();
    if trimmed.starts_with('[') {
        return serde_json::from_str(trimmed).map_err(|e| e.to_string());
    }
    text.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(i, line)| serde_json::from_str(line).map_err(|e| format!("line {}: {}", i + 1, e)))
        .collect()
}

/// 写出结论；父目录不存在时创建
pub fn write_findings(path: &Path, findings: &[Finding], format: OutputFormat) -> Result<(), AgentError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let body = render_findings(findings, format.resolve(path))?;
    std::fs::write(path, body)?;
    tracing::info!(target: "triage::summary", path = %path.display(), count = findings.len(), "findings written");
    Ok(())
}

fn render_findings(findings: &[Finding], format: OutputFormat) -> Result<String, AgentError> {
    let to_err = |e: serde_json::Error| AgentError::Input(format!("failed to serialize findings: {}", e));
    match format {
        OutputFormat::Jsonl => {
            let mut out = String::new();
            for f in findings {
                out.push_str(&serde_json::to_string(f).map_err(to_err)?);
                out.push('\n');
            }
            Ok(out)
        }
        _ => serde_json::to_string_pretty(findings).map_err(to_err),
    }
}
