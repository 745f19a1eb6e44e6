//! 工具执行器
//!
//! 持有 ToolRegistry、参数校验器与全局超时。execute(call) 的流程：
//! 查找工具 -> 规整查询参数 -> 超时内执行 -> 过滤条件出错时按三级回退重试 -> 附带修正建议。
//! 工具错误不会向上传播，一律转为 ToolResult 回显给模型；每次调用输出结构化审计日志（JSON）。

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::{Map, Value};
use tokio::time::timeout;

use crate::tools::completion::COMPLETION_TOOL;
use crate::tools::preview::PREVIEW_TOOL;
use crate::tools::protocol::ToolCall;
use crate::tools::query::QUERY_TOOL;
use crate::tools::registry::{Tool, ToolError, ToolPayload, ToolRegistry, ToolResult};
use crate::tools::validator::ParameterValidator;

/// 第二级回退的默认行数
pub const DEFAULT_FALLBACK_NROWS: usize = 200;

/// 日志文件降级读取时固定投影的列
pub const LOG_FALLBACK_COLUMNS: [&str; 3] = ["@timestamp", "message", "k8_pod"];

/// 工具执行器：超时、参数校验、三级回退与修正建议
pub struct ToolExecutor {
    registry: ToolRegistry,
    validator: ParameterValidator,
    timeout: Duration,
    mapping_param: String,
    fallback_nrows: usize,
}

impl ToolExecutor {
    pub fn new(registry: ToolRegistry, validator: ParameterValidator, timeout_secs: u64) -> Self {
        Self {
            registry,
            validator,
            timeout: Duration::from_secs(timeout_secs.max(1)),
            mapping_param: "read_options".to_string(),
            fallback_nrows: DEFAULT_FALLBACK_NROWS,
        }
    }

    pub fn with_mapping_param(mut self, name: impl Into<String>) -> Self {
        self.mapping_param = name.into();
        self
    }

    pub fn with_fallback_nrows(mut self, nrows: usize) -> Self {
        self.fallback_nrows = nrows.max(1);
        self
    }

    /// 执行一次工具调用；任何失败都被吸收为 `success == false` 的 ToolResult
    pub async fn execute(&self, call: &ToolCall) -> ToolResult {
        let start = Instant::now();
        let Some(tool) = self.registry.get(&call.name) else {
            let err = ToolError::UnknownTool {
                name: call.name.clone(),
                available: self.registry.tool_names(),
            };
            let result = ToolResult::failed(err, Some("Call one of the available tools listed above".to_string()));
            self.audit(call, &result, start);
            return result;
        };

        let missing = missing_required(tool.as_ref(), &call.parameters);
        if !missing.is_empty() {
            let err = ToolError::InvalidArguments(format!("missing required parameter(s): {}", missing.join(", ")));
            let suggestion = suggestion_for(&call.name, &err);
            let result = ToolResult::failed(err, Some(suggestion));
            self.audit(call, &result, start);
            return result;
        }

        let mut params = call.parameters.clone();
        let notes = if call.name == QUERY_TOOL {
            self.validate_query_params(&mut params)
        } else {
            Vec::new()
        };
        for note in &notes {
            tracing::debug!(target: "triage::tool", tool = %call.name, note = %note, "parameter corrected");
        }

        let result = match self.run_tool(&tool, &params).await {
            Ok(payload) => ToolResult::ok(payload).with_notes(notes),
            Err(err @ ToolError::MalformedFilter(_)) if call.name == QUERY_TOOL => {
                match self.run_fallback(&params, &err).await {
                    Some(recovered) => recovered.with_notes(notes),
                    None => {
                        let suggestion = suggestion_for(&call.name, &err);
                        ToolResult::failed(err, Some(suggestion)).with_notes(notes)
                    }
                }
            }
            Err(err) => {
                let suggestion = suggestion_for(&call.name, &err);
                ToolResult::failed(err, Some(suggestion)).with_notes(notes)
            }
        };

        self.audit(call, &result, start);
        result
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.registry.tool_names()
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// 查询参数缺省时补一个空映射，保证行数上限一定被施加
    fn validate_query_params(&self, params: &mut Map<String, Value>) -> Vec<String> {
        let mut opts = match params.remove(&self.mapping_param) {
            Some(Value::Object(map)) => map,
            Some(Value::Null) | None => Map::new(),
            Some(other) => {
                params.insert(self.mapping_param.clone(), other);
                return vec![format!("{} is not a mapping and was passed through", self.mapping_param)];
            }
        };
        let notes = self.validator.validate_read_options(&mut opts);
        params.insert(self.mapping_param.clone(), Value::Object(opts));
        notes
    }

    async fn run_tool(&self, tool: &Arc<dyn Tool>, params: &Map<String, Value>) -> Result<ToolPayload, ToolError> {
        match timeout(self.timeout, tool.execute(params)).await {
            Ok(result) => result,
            Err(_) => Err(ToolError::Timeout(self.timeout.as_secs())),
        }
    }

    /// 三级回退：丢弃调用方的过滤与投影（日志文件只取固定列）-> 更小的行数 -> 仅预览文件
    async fn run_fallback(&self, params: &Map<String, Value>, original: &ToolError) -> Option<ToolResult> {
        let query = self.registry.get(QUERY_TOOL)?;
        let file_path = params.get("file_path").cloned().unwrap_or(Value::Null);

        let mut tier_one = Map::new();
        tier_one.insert("nrows".to_string(), Value::from(self.validator.settings().default_nrows));
        if file_path.as_str().is_some_and(|p| p.contains("log")) {
            tier_one.insert("columns".to_string(), Value::from(LOG_FALLBACK_COLUMNS.to_vec()));
        }
        let mut tier_two = Map::new();
        tier_two.insert("nrows".to_string(), Value::from(self.fallback_nrows));

        let attempts: [(u8, Arc<dyn Tool>, Map<String, Value>); 2] =
            [(1, query.clone(), tier_one), (2, query, tier_two)];
        for (tier, tool, opts) in attempts {
            let mut p = Map::new();
            p.insert("file_path".to_string(), file_path.clone());
            p.insert(self.mapping_param.clone(), Value::Object(opts));
            match self.run_tool(&tool, &p).await {
                Ok(payload) => return Some(fallback_result(payload, tier, original)),
                Err(e) => {
                    tracing::debug!(target: "triage::tool", tier, error = %e, "fallback tier failed");
                }
            }
        }

        let preview = self.registry.get(PREVIEW_TOOL)?;
        let mut p = Map::new();
        p.insert("file_path".to_string(), file_path);
        match self.run_tool(&preview, &p).await {
            Ok(payload) => Some(fallback_result(payload, 3, original)),
            Err(e) => {
                tracing::debug!(target: "triage::tool", tier = 3u8, error = %e, "fallback tier failed");
                None
            }
        }
    }

    fn audit(&self, call: &ToolCall, result: &ToolResult, start: Instant) {
        let outcome = match (&result.error, result.used_fallback) {
            (None, true) => "fallback",
            (None, false) => "ok",
            (Some(ToolError::Timeout(_)), _) => "timeout",
            (Some(_), _) => "error",
        };
        let audit = serde_json::json!({
            "event": "tool_audit",
            "tool": call.name,
            "ok": result.success,
            "outcome": outcome,
            "error_kind": result.error.as_ref().map(ToolError::kind),
            "fallback_tier": result.fallback_tier,
            "duration_ms": start.elapsed().as_millis() as u64,
            "args_preview": args_preview(&Value::Object(call.parameters.clone())),
        });
        tracing::info!(target: "triage::tool", audit = %audit.to_string(), "tool");
    }
}

fn fallback_result(payload: ToolPayload, tier: u8, original: &ToolError) -> ToolResult {
    tracing::info!(target: "triage::tool", tier, original = %original, "fallback succeeded");
    let mut result = ToolResult::ok(payload);
    result.used_fallback = true;
    result.fallback_tier = Some(tier);
    result.original_error = Some(original.to_string());
    result
}

/// 按工具参数 schema 的 required 列表找出缺失的参数
fn missing_required(tool: &dyn Tool, params: &Map<String, Value>) -> Vec<String> {
    tool.parameters_schema()
        .get("required")
        .and_then(Value::as_array)
        .map(|req| {
            req.iter()
                .filter_map(Value::as_str)
                .filter(|name| !params.contains_key(*name))
                .map(String::from)
                .collect()
        })
        .unwrap_or_default()
}

/// 按失败类型给出修正建议
pub fn suggestion_for(tool: &str, err: &ToolError) -> String {
    match err {
        ToolError::FileNotFound(_) if tool == PREVIEW_TOOL => {
            "Check the path format: <base>/processed_data/YYYY-MM-DD/<type>/<file>; only use files listed in the task"
                .to_string()
        }
        ToolError::FileNotFound(_) => {
            "The file does not exist; use preview_table on the files listed in the task to confirm the path first"
                .to_string()
        }
        ToolError::MissingColumns(_) => {
            "Use preview_table to list the available columns before selecting them".to_string()
        }
        ToolError::PayloadTooLarge { recommended_rows, .. } => format!(
            "Reduce the data: add filters, lower nrows (at most {}) or select only key columns",
            recommended_rows
        ),
        ToolError::MalformedFilter(_) => {
            "Check filter operators (==, !=, <, <=, >, >=, in, not in), column names and value formats".to_string()
        }
        ToolError::Schema(_) | ToolError::InvalidArguments(_) if tool == COMPLETION_TOOL => {
            "Resubmit attempt_completion with all required fields: uuid, component, reason, time and \
             reasoning_trace entries of {step, action, observation}"
                .to_string()
        }
        ToolError::Timeout(_) => "The read took too long; narrow it with filters or a smaller nrows".to_string(),
        ToolError::Unsupported(_) => "Only CSV, JSON, JSON Lines and Parquet files can be read".to_string(),
        _ if tool == QUERY_TOOL => {
            "Simplify the parameters: fewer filters, nrows=500 and key columns only".to_string()
        }
        _ => "Check the parameter format and that the data file exists".to_string(),
    }
}

fn args_preview(args: &Value) -> String {
    let s = args.to_string();
    if s.len() > 200 {
        format!("{}...", s.chars().take(200).collect::<String>())
    } else {
        s
    }
}
