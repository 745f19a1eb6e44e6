//! 完成门控工具
//!
//! `result` 参数必须是符合结论 schema 的 JSON；缺字段或推理轨迹格式错误时返回 Schema 错误，
//! 案例继续运行，由模型修正后重新提交。

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::case::{Finding, REQUIRED_FIELDS};
use crate::tools::registry::{Tool, ToolError, ToolPayload};

pub const COMPLETION_TOOL: &str = "attempt_completion";
pub const RESULT_PARAM: &str = "result";

#[derive(Debug, Default)]
pub struct CompletionTool;

impl CompletionTool {
    pub fn new() -> Self {
        Self
    }
}

/// 校验并解析结论载荷
pub fn validate_finding(raw: &str) -> Result<Finding, ToolError> {
    let text = strip_code_fence(raw);
    let mut value: Value = serde_json::from_str(text)
        .map_err(|e| ToolError::Schema(format!("result is not valid JSON: {}", e)))?;
    let obj = value
        .as_object_mut()
        .ok_or_else(|| ToolError::Schema("result must be a JSON object".to_string()))?;

    for (field, aliases) in REQUIRED_FIELDS.iter() {
        if !obj.contains_key(*field) && !aliases.iter().any(|a| obj.contains_key(*a)) {
            return Err(ToolError::Schema(format!("missing required field: {}", field)));
        }
    }

    let trace_key = ["reasoningTrace", "reasoning_trace"]
        .into_iter()
        .find(|k| obj.contains_key(*k))
        .unwrap_or("reasoningTrace");
    let steps = obj
        .get_mut(trace_key)
        .and_then(Value::as_array_mut)
        .ok_or_else(|| ToolError::Schema("reasoningTrace must be an array".to_string()))?;
    for (i, step) in steps.iter_mut().enumerate() {
        let entry = step.as_object_mut().filter(|s| {
            s.contains_key("step") && s.contains_key("action") && s.contains_key("observation")
        });
        let Some(entry) = entry else {
            return Err(ToolError::Schema(format!(
                "reasoningTrace step {} must contain step, action and observation",
                i + 1
            )));
        };
        coerce_step(entry, i)?;
    }

    // 标量字段允许数字等非字符串写法
    for key in ["id", "uuid", "component", "cause", "reason", "occurredAt", "time", "occurred_at"] {
        if let Some(v) = obj.get_mut(key) {
            stringify(v);
        }
    }

    serde_json::from_value(value).map_err(|e| ToolError::Schema(e.to_string()))
}

fn coerce_step(entry: &mut Map<String, Value>, index: usize) -> Result<(), ToolError> {
    let step_num = match entry.get("step") {
        Some(Value::Number(n)) => n.as_u64(),
        Some(Value::String(s)) => s.trim().parse::<u64>().ok(),
        _ => None,
    }
    .ok_or_else(|| {
        ToolError::Schema(format!(
            "reasoningTrace step {} has a non-integer step number",
            index + 1
        ))
    })?;
    entry.insert("step".to_string(), Value::from(step_num));
    for key in ["action", "observation"] {
        if let Some(v) = entry.get_mut(key) {
            stringify(v);
        }
    }
    Ok(())
}

fn stringify(v: &mut Value) {
    if v.is_string() {
        return;
    }
    let text = match &*v {
        Value::Null => String::new(),
        other => other.to_string(),
    };
    *v = Value::String(text);
}

fn strip_code_fence(raw: &str) -> &str {
    let t = raw.trim();
    let Some(rest) = t.strip_prefix("```") else {
        return t;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

#[async_trait]
impl Tool for CompletionTool {
    fn name(&self) -> &str {
        COMPLETION_TOOL
    }

    fn description(&self) -> &str {
        "Submit the final diagnosis. Parameter: <result>{\"uuid\": \"...\", \"component\": \"...\", \
         \"reason\": \"...\", \"time\": \"YYYY-MM-DD HH:MM:SS\", \"reasoning_trace\": \
         [{\"step\": 1, \"action\": \"...\", \"observation\": \"...\"}]}</result>"
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": { RESULT_PARAM: {"type": "string"} },
            "required": [RESULT_PARAM]
        })
    }

    async fn execute(&self, params: &Map<String, Value>) -> Result<ToolPayload, ToolError> {
        let raw = match params.get(RESULT_PARAM) {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Object(_)) => params[RESULT_PARAM].to_string(),
            _ => return Err(ToolError::Schema(format!("missing <{}> parameter", RESULT_PARAM))),
        };
        let finding = validate_finding(&raw)?;
        tracing::info!(target: "triage::diagnosis", id = %finding.id, component = %finding.component, "finding validated");
        Ok(ToolPayload::Completed(finding))
    }
}
