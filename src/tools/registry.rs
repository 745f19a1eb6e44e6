//! 工具注册表与结果模型
//!
//! 所有工具实现 Tool trait（name / description / execute），由 ToolRegistry 按名注册与查找；
//! 执行结果统一为 ToolResult（成功载荷或 ToolError + 建议），由 ToolExecutor 加超时、校验与回退。

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::case::Finding;
use crate::tools::table::{Row, TableError};

/// 工具 trait：名称、描述（供 LLM 理解）、参数 schema、异步执行
#[async_trait]
pub trait Tool: Send + Sync {
    /// 工具名称（即调用标签名）
    fn name(&self) -> &str;

    /// 工具描述（供 LLM 理解功能）
    fn description(&self) -> &str;

    /// 参数 JSON Schema；默认无参数
    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {},
            "required": []
        })
    }

    /// 执行工具；参数已经过解析与校验
    async fn execute(&self, params: &Map<String, Value>) -> Result<ToolPayload, ToolError>;
}

/// 工具层错误；在本地吸收并转为对话内容，不终止案例
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ToolError {
    #[error("Unknown tool: {name}. Available tools: {}", .available.join(", "))]
    UnknownTool { name: String, available: Vec<String> },

    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("Columns not found: {}", .0.join(", "))]
    MissingColumns(Vec<String>),

    #[error("Malformed filters: {0}")]
    MalformedFilter(String),

    #[error(
        "Data too large: estimated {estimated_tokens} tokens exceeds the {limit} token limit \
         ({rows} rows x {columns} columns, recommended max rows: {recommended_rows})"
    )]
    PayloadTooLarge {
        estimated_tokens: usize,
        limit: usize,
        rows: usize,
        columns: usize,
        recommended_rows: usize,
    },

    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("Unsupported: {0}")]
    Unsupported(String),

    #[error("Tool timed out after {0}s")]
    Timeout(u64),

    /// 结论载荷校验失败（缺字段 / 轨迹格式错误 / JSON 解析失败）
    #[error("Schema validation failed: {0}")]
    Schema(String),

    #[error("Tool execution failed: {0}")]
    Failed(String),
}

impl ToolError {
    /// 稳定的错误类别名（审计日志与建议索引用）
    pub fn kind(&self) -> &'static str {
        match self {
            ToolError::UnknownTool { .. } => "unknown_tool",
            ToolError::FileNotFound(_) => "file_not_found",
            ToolError::MissingColumns(_) => "missing_columns",
            ToolError::MalformedFilter(_) => "malformed_filter",
            ToolError::PayloadTooLarge { .. } => "payload_too_large",
            ToolError::InvalidArguments(_) => "invalid_arguments",
            ToolError::Unsupported(_) => "unsupported",
            ToolError::Timeout(_) => "timeout",
            ToolError::Schema(_) => "schema",
            ToolError::Failed(_) => "failed",
        }
    }
}

impl From<TableError> for ToolError {
    fn from(e: TableError) -> Self {
        match e {
            TableError::NotFound(p) => ToolError::FileNotFound(p),
            TableError::OutsideRoot(p) => {
                ToolError::InvalidArguments(format!("path escapes data root: {}", p))
            }
            TableError::MissingColumns(c) => ToolError::MissingColumns(c),
            TableError::MalformedFilter(m) => ToolError::MalformedFilter(m),
            TableError::Unsupported(m) => ToolError::Unsupported(m),
            other @ (TableError::Parse { .. } | TableError::Io(_)) => {
                ToolError::Failed(other.to_string())
            }
        }
    }
}

/// 文件预览载荷
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PreviewData {
    pub file_path: String,
    pub file_size_mb: Option<f64>,
    /// 完整文件的 (行数, 列数)
    pub shape: (usize, usize),
    pub columns: Vec<String>,
    pub dtypes: Map<String, Value>,
    pub sample: Vec<Row>,
    pub null_counts: Map<String, Value>,
    pub warning: Option<String>,
}

/// 数据查询载荷
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RowsData {
    pub file_path: String,
    pub shape: (usize, usize),
    pub columns: Vec<String>,
    pub rows: Vec<Row>,
    pub estimated_tokens: usize,
    pub time_columns: Vec<String>,
    pub warnings: Vec<String>,
}

/// 工具成功时的载荷
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ToolPayload {
    Preview(PreviewData),
    Rows(RowsData),
    /// 完成门控通过：终态结论
    Completed(Finding),
}

/// 单次工具执行结果
#[derive(Debug, Clone, PartialEq)]
pub struct ToolResult {
    pub success: bool,
    pub payload: Option<ToolPayload>,
    pub error: Option<ToolError>,
    pub suggestion: Option<String>,
    pub used_fallback: bool,
    /// 成功的回退层级（1..=3）
    pub fallback_tier: Option<u8>,
    /// 触发回退的原始错误
    pub original_error: Option<String>,
    /// 参数校验过程中的修正记录
    pub notes: Vec<String>,
}

impl ToolResult {
    pub fn ok(payload: ToolPayload) -> Self {
        Self {
            success: true,
            payload: Some(payload),
            error: None,
            suggestion: None,
            used_fallback: false,
            fallback_tier: None,
            original_error: None,
            notes: Vec::new(),
        }
    }

    pub fn failed(error: ToolError, suggestion: Option<String>) -> Self {
        Self {
            success: false,
            payload: None,
            error: Some(error),
            suggestion,
            used_fallback: false,
            fallback_tier: None,
            original_error: None,
            notes: Vec::new(),
        }
    }

    pub fn with_notes(mut self, notes: Vec<String>) -> Self {
        self.notes = notes;
        self
    }

    /// 完成门控通过时返回结论
    pub fn finding(&self) -> Option<&Finding> {
        match &self.payload {
            Some(ToolPayload::Completed(f)) => Some(f),
            _ => None,
        }
    }
}

/// 工具注册表：按名称存储 Arc<dyn Tool>
#[derive(Default, Clone)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: impl Tool + 'static) {
        let name = tool.name().to_string();
        self.tools.insert(name, Arc::new(tool));
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    /// 已注册工具名（排序，保证提示词与解析顺序稳定）
    pub fn tool_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    /// 返回 (name, description) 列表，用于生成 prompt 中的工具段落
    pub fn tool_descriptions(&self) -> Vec<(String, String)> {
        self.tool_names()
            .into_iter()
            .filter_map(|name| {
                let desc = self.tools.get(&name)?.description().to_string();
                Some((name, desc))
            })
            .collect()
    }
}
