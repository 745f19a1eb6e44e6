//! 工具调用协议
//!
//! 模型输出中的调用块形如 `<tool_name><param>value</param>...</tool_name>`。
//! parse 只识别已注册的工具名，块未闭合或参数残缺时跳过并记日志，不报错；
//! 指定的映射参数（read_options）按字面量文法解析，失败时为空映射，其余参数保持字符串。
//! format 把执行结果渲染为回给模型的文本块，过长内容先压缩。

use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::memory::TokenEstimator;
use crate::tools::literal::parse_mapping;
use crate::tools::registry::{ToolPayload, ToolResult};

/// 一次工具调用
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolCall {
    pub name: String,
    pub parameters: Map<String, Value>,
}

impl ToolCall {
    pub fn new(name: impl Into<String>, parameters: Map<String, Value>) -> Self {
        Self {
            name: name.into(),
            parameters,
        }
    }

    /// 步骤记录用的动作文本：`name({...})`
    pub fn action(&self) -> String {
        format!("{}({})", self.name, Value::Object(self.parameters.clone()))
    }

    pub fn str_param(&self, key: &str) -> Option<&str> {
        self.parameters.get(key).and_then(Value::as_str)
    }
}

/// 压缩时总保留的前几行
const KEEP_HEAD_LINES: usize = 5;
/// 压缩时额外保留的关键行特征
const KEY_INDICATORS: &[&str] = &[
    "error", "failed", "success", "shape", "token", "data", "warning", "错误", "失败", "成功",
];

/// 协议解析 / 渲染器
#[derive(Debug, Clone)]
pub struct ToolProtocol {
    tool_names: Vec<String>,
    mapping_param: String,
    max_result_tokens: usize,
    sample_rows: usize,
    estimator: TokenEstimator,
}

impl ToolProtocol {
    pub fn new(tool_names: Vec<String>, mapping_param: impl Into<String>) -> Self {
        Self {
            tool_names,
            mapping_param: mapping_param.into(),
            max_result_tokens: 10_000,
            sample_rows: 3,
            estimator: TokenEstimator::default(),
        }
    }

    /// 工具结果回显上限（估算 token）与估算器
    pub fn with_result_limit(mut self, max_result_tokens: usize, estimator: TokenEstimator) -> Self {
        self.max_result_tokens = max_result_tokens;
        self.estimator = estimator;
        self
    }

    pub fn with_sample_rows(mut self, n: usize) -> Self {
        self.sample_rows = n;
        self
    }

    /// 提取全部已识别的工具调用，按在文本中出现的位置排序
    pub fn parse(&self, text: &str) -> Vec<ToolCall> {
        let mut found: Vec<(usize, ToolCall)> = Vec::new();
        for name in &self.tool_names {
            let open = format!("<{}>", name);
            let close = format!("</{}>", name);
            let mut cursor = 0;
            while let Some(rel) = text[cursor..].find(&open) {
                let start = cursor + rel;
                let body_start = start + open.len();
                let Some(body_len) = text[body_start..].find(&close) else {
                    tracing::debug!(target: "triage::tool", tool = %name, offset = start, "unterminated tool block skipped");
                    break;
                };
                let body = &text[body_start..body_start + body_len];
                found.push((start, ToolCall::new(name.clone(), self.parse_params(body))));
                cursor = body_start + body_len + close.len();
            }
        }
        found.sort_by_key(|(pos, _)| *pos);
        found.into_iter().map(|(_, call)| call).collect()
    }

    fn parse_params(&self, body: &str) -> Map<String, Value> {
        static OPEN_RE: OnceLock<Regex> = OnceLock::new();
        let open_re = OPEN_RE.get_or_init(|| Regex::new(r"<([A-Za-z_][A-Za-z0-9_]*)>").unwrap());

        let mut params = Map::new();
        let mut cursor = 0;
        while let Some(caps) = open_re.captures(&body[cursor..]) {
            let (Some(whole), Some(name)) = (caps.get(0), caps.get(1)) else {
                break;
            };
            let name = name.as_str();
            let value_start = cursor + whole.end();
            let close = format!("</{}>", name);
            match body[value_start..].find(&close) {
                Some(len) => {
                    let raw = body[value_start..value_start + len].trim();
                    let value = if name == self.mapping_param {
                        Value::Object(parse_mapping(raw))
                    } else {
                        Value::String(raw.to_string())
                    };
                    params.insert(name.to_string(), value);
                    cursor = value_start + len + close.len();
                }
                None => {
                    tracing::debug!(target: "triage::tool", param = %name, "unterminated parameter skipped");
                    cursor = value_start;
                }
            }
        }
        params
    }

    /// 渲染单个调用的执行结果
    pub fn format(&self, call: &ToolCall, result: &ToolResult) -> String {
        let mut out = format!("=== Tool Execution Result: {} ===\n", call.name);

        if !result.success {
            let err = result
                .error
                .as_ref()
                .map(|e| e.to_string())
                .unwrap_or_else(|| "unknown error".to_string());
            out.push_str(&format!("Error: {}\n", err));
            if let Some(s) = &result.suggestion {
                out.push_str(&format!("Suggestion: {}\n", s));
            }
        } else {
            if result.used_fallback {
                out.push_str(&format!(
                    "Note: original request failed ({}); fallback tier {} was used\n",
                    result.original_error.as_deref().unwrap_or("unknown"),
                    result.fallback_tier.unwrap_or(0)
                ));
            }
            match &result.payload {
                Some(ToolPayload::Completed(finding)) => {
                    out.push_str("Task completed, result format validated\n");
                    let body = serde_json::to_string_pretty(finding).unwrap_or_default();
                    out.push_str(&format!("Result: {}\n", self.compress(&body)));
                }
                Some(ToolPayload::Rows(rows)) => {
                    out.push_str("Tool execution successful\n");
                    let mut body = format!(
                        "Data shape: ({} rows x {} columns)\nEstimated tokens: {}\nColumns: {}\n",
                        rows.shape.0,
                        rows.shape.1,
                        rows.estimated_tokens,
                        rows.columns.join(", ")
                    );
                    if !rows.time_columns.is_empty() {
                        body.push_str(&format!("Time columns: {}\n", rows.time_columns.join(", ")));
                    }
                    for w in &rows.warnings {
                        body.push_str(&format!("Warning: {}\n", w));
                    }
                    let n = self.sample_rows.min(rows.rows.len());
                    body.push_str(&format!(
                        "Data example (first {} rows): {}\n",
                        n,
                        Value::Array(rows.rows[..n].iter().cloned().map(Value::Object).collect())
                    ));
                    out.push_str(&self.compress(&body));
                }
                Some(ToolPayload::Preview(p)) => {
                    out.push_str("Tool execution successful\n");
                    let mut body = format!(
                        "File: {}\nShape: ({} rows x {} columns), showing first {} rows\nColumns: {}\nDtypes: {}\nNull counts: {}\n",
                        p.file_path,
                        p.shape.0,
                        p.shape.1,
                        p.sample.len(),
                        p.columns.join(", "),
                        Value::Object(p.dtypes.clone()),
                        Value::Object(p.null_counts.clone()),
                    );
                    if let Some(size) = p.file_size_mb {
                        body.push_str(&format!("File size: {:.2} MB\n", size));
                    }
                    body.push_str(&format!(
                        "Sample data: {}\n",
                        Value::Array(p.sample.iter().cloned().map(Value::Object).collect())
                    ));
                    if let Some(w) = &p.warning {
                        body.push_str(&format!("Warning: {}\n", w));
                    }
                    out.push_str(&self.compress(&body));
                }
                None => out.push_str("Tool execution successful\n"),
            }
        }

        for note in &result.notes {
            out.push_str(&format!("Parameter note: {}\n", note));
        }
        out.push_str(&"=".repeat(50));
        out.push('\n');
        out
    }

    /// 超出回显上限时保留前几行与含关键特征的行，并附压缩说明
    pub fn compress(&self, text: &str) -> String {
        let estimated = self.estimator.estimate_text(text);
        if estimated <= self.max_result_tokens {
            return text.to_string();
        }
        let lines: Vec<&str> = text.lines().collect();
        let mut kept: Vec<&str> = lines.iter().take(KEEP_HEAD_LINES).copied().collect();
        kept.extend(lines.iter().skip(KEEP_HEAD_LINES).copied().filter(|line| {
            let lower = line.to_lowercase();
            KEY_INDICATORS.iter().any(|k| lower.contains(k))
        }));

        // 保留下来的单行仍可能过长，按上限截断
        let budget_chars = self.max_result_tokens.saturating_mul(3).max(1);
        let mut joined = kept.join("\n");
        if joined.chars().count() > budget_chars {
            joined = joined.chars().take(budget_chars).collect();
        }
        let after = self.estimator.estimate_text(&joined);
        format!(
            "{}\n... [Result compressed, original length {} tokens, compressed length {} tokens]\n",
            joined, estimated, after
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::registry::{RowsData, ToolError};
    use serde_json::json;

    fn protocol() -> ToolProtocol {
        ToolProtocol::new(
            vec![
                "attempt_completion".to_string(),
                "preview_table".to_string(),
                "query_table".to_string(),
            ],
            "read_options",
        )
    }

    #[test]
    fn test_parse_in_text_order_with_mapping() {
        let text = "I will look.\n<query_table>\n<file_path>logs.csv</file_path>\n\
            <read_options>{'nrows': 10, 'filters': [('level', '==', 'ERROR')]}</read_options>\n\
            </query_table>\nand\n<preview_table><file_path>a.csv</file_path></preview_table>";
        let calls = protocol().parse(text);
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].name, "query_table");
        assert_eq!(calls[0].str_param("file_path"), Some("logs.csv"));
        assert_eq!(
            calls[0].parameters["read_options"],
            json!({"nrows": 10, "filters": [["level", "==", "ERROR"]]})
        );
        assert_eq!(calls[1].name, "preview_table");
    }

    #[test]
    fn test_parse_bad_mapping_fails_closed() {
        let text = "<query_table><file_path>x.csv</file_path>\
            <read_options>open('/etc/passwd').read()</read_options></query_table>";
        let calls = protocol().parse(text);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].parameters["read_options"], json!({}));
    }

    #[test]
    fn test_parse_unterminated_never_panics() {
        let p = protocol();
        assert!(p.parse("<query_table><file_path>x.csv</file_path>").is_empty());
        assert!(p.parse("<unknown_tool><a>1</a></unknown_tool>").is_empty());
        assert!(p.parse("").is_empty());

        let calls = p.parse("<preview_table><file_path>x.csv</preview_table>");
        assert_eq!(calls.len(), 1);
        assert!(calls[0].parameters.is_empty());
    }

    #[test]
    fn test_format_error_with_suggestion() {
        let call = ToolCall::new("query_table", Map::new());
        let result = ToolResult::failed(
            ToolError::FileNotFound("x.csv".into()),
            Some("preview the directory first".into()),
        );
        let text = protocol().format(&call, &result);
        assert!(text.contains("Error: File not found: x.csv"));
        assert!(text.contains("Suggestion: preview the directory first"));
    }

    #[test]
    fn test_format_rows_shows_shape_and_sample() {
        let rows: Vec<_> = (0..10)
            .map(|i| json!({"k8_pod": format!("pod-{i}")}).as_object().cloned().unwrap())
            .collect();
        let payload = ToolPayload::Rows(RowsData {
            file_path: "a.csv".into(),
            shape: (10, 1),
            columns: vec!["k8_pod".into()],
            rows,
            estimated_tokens: 60,
            time_columns: vec![],
            warnings: vec![],
        });
        let text = protocol().format(&ToolCall::new("query_table", Map::new()), &ToolResult::ok(payload));
        assert!(text.contains("Data shape: (10 rows x 1 columns)"));
        assert!(text.contains("pod-2"));
        assert!(!text.contains("pod-3"));
    }

    #[test]
    fn test_compress_keeps_head_and_key_lines() {
        let p = protocol().with_result_limit(10, TokenEstimator::new(3));
        let mut text = String::new();
        for i in 0..40 {
            text.push_str(&format!("line {i} filler filler\n"));
        }
        text.push_str("ERROR connection refused\n");
        let out = p.compress(&text);
        assert!(out.starts_with("line 0"));
        assert!(out.contains("[Result compressed"));
        assert!(!out.contains("line 20"));
    }
}
