//! 诊断案例与结构化结论
//!
//! Case 由外部输入提供且只读；Finding 是 completion 工具必须提交的结论载荷，也是最终输出记录的形状。

use serde::{Deserialize, Serialize};

/// 单个故障案例（输入记录）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Case {
    #[serde(alias = "uuid")]
    pub id: String,
    #[serde(alias = "Anomaly Description")]
    pub description: String,
}

impl Case {
    pub fn new(id: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
        }
    }

    /// 进度展示用的短 ID（前 8 个字符）
    pub fn short_id(&self) -> &str {
        short_id(&self.id)
    }
}

pub fn short_id(id: &str) -> &str {
    match id.char_indices().nth(8) {
        Some((idx, _)) => &id[..idx],
        None => id,
    }
}

/// 推理轨迹中的一步
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceStep {
    pub step: u32,
    pub action: String,
    pub observation: String,
}

/// 结构化诊断结论；序列化时字段名固定为 id / component / cause / occurredAt / reasoningTrace
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Finding {
    #[serde(alias = "uuid")]
    pub id: String,
    pub component: String,
    #[serde(alias = "reason")]
    pub cause: String,
    #[serde(alias = "time", alias = "occurred_at")]
    pub occurred_at: String,
    #[serde(alias = "reasoning_trace")]
    pub reasoning_trace: Vec<TraceStep>,
}

/// 必填字段：规范名与可接受的别名
pub const REQUIRED_FIELDS: [(&str, &[&str]); 5] = [
    ("id", &["uuid"]),
    ("component", &[]),
    ("cause", &["reason"]),
    ("occurredAt", &["time", "occurred_at"]),
    ("reasoningTrace", &["reasoning_trace"]),
];

/// 占位结论中的固定时间
const PLACEHOLDER_TIME: &str = "2025-06-06 12:00:00";

impl Finding {
    /// 未完成 / 失败案例的固定形状占位结论，保证输出条数与输入一致
    pub fn placeholder(case_id: impl Into<String>) -> Self {
        Self {
            id: case_id.into(),
            component: "unknown".to_string(),
            cause: "analysis_failed".to_string(),
            occurred_at: PLACEHOLDER_TIME.to_string(),
            reasoning_trace: vec![TraceStep {
                step: 1,
                action: "DiagnosisAttempt".to_string(),
                observation: "Automatic diagnosis failed, requires manual investigation".to_string(),
            }],
        }
    }

    pub fn is_placeholder(&self) -> bool {
        self.component == "unknown" && self.cause == "analysis_failed"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_case_accepts_competition_field_names() {
        let case: Case =
            serde_json::from_str(r#"{"uuid": "abc", "Anomaly Description": "cpu spike"}"#).unwrap();
        assert_eq!(case, Case::new("abc", "cpu spike"));
    }

    #[test]
    fn test_finding_serializes_canonical_names() {
        let json = serde_json::to_value(Finding::placeholder("c1")).unwrap();
        let obj = json.as_object().unwrap();
        let mut keys: Vec<&str> = obj.keys().map(String::as_str).collect();
        keys.sort();
        assert_eq!(keys, vec!["cause", "component", "id", "occurredAt", "reasoningTrace"]);
    }

    #[test]
    fn test_finding_accepts_aliases() {
        let f: Finding = serde_json::from_str(
            r#"{"uuid":"u","component":"cart","reason":"cpu","time":"t",
                "reasoning_trace":[{"step":1,"action":"a","observation":"o"}]}"#,
        )
        .unwrap();
        assert_eq!(f.id, "u");
        assert_eq!(f.cause, "cpu");
        assert_eq!(f.reasoning_trace.len(), 1);
    }

    #[test]
    fn test_short_id() {
        assert_eq!(short_id("0123456789"), "01234567");
        assert_eq!(short_id("abc"), "abc");
    }
}
