//! 读取参数校验与修正
//!
//! 在执行查询工具之前规整 read_options：过滤操作符收敛到固定集合，时间戳值统一格式，
//! 行数 / 列数施加安全上限。所有修正以 issue 文本返回，随工具结果回显给模型。

use std::sync::OnceLock;

use chrono::NaiveDateTime;
use regex::Regex;
use serde_json::{Map, Value};

use crate::tools::table::FilterOp;

/// 模式匹配类操作符：不支持，丢弃对应过滤条件
const PATTERN_OPS: &[&str] = &[
    "like", "ilike", "not like", "contains", "regex", "startswith", "endswith", "match",
];

/// 校验阈值
#[derive(Debug, Clone)]
pub struct ValidatorSettings {
    pub default_nrows: usize,
    pub max_safe_rows: usize,
    pub max_columns: usize,
    /// 列过多时优先保留的列
    pub priority_columns: Vec<String>,
}

impl Default for ValidatorSettings {
    fn default() -> Self {
        Self {
            default_nrows: 500,
            max_safe_rows: 1000,
            max_columns: 15,
            priority_columns: ["@timestamp", "message", "level", "k8_pod", "k8_namespace"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ParameterValidator {
    settings: ValidatorSettings,
}

impl ParameterValidator {
    pub fn new(settings: ValidatorSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &ValidatorSettings {
        &self.settings
    }

    /// 原地规整读取参数，返回修正记录
    pub fn validate_read_options(&self, opts: &mut Map<String, Value>) -> Vec<String> {
        let mut issues = Vec::new();

        if let Some(raw) = opts.remove("filters") {
            match raw {
                Value::Array(items) if !items.is_empty() => {
                    let valid = self.validate_filters(items, &mut issues);
                    if valid.is_empty() {
                        issues.push("all filters were invalid; reading without filters".to_string());
                        let cap = self.settings.default_nrows;
                        let too_big = opts
                            .get("nrows")
                            .and_then(Value::as_u64)
                            .map_or(true, |n| n as usize > cap);
                        if too_big {
                            opts.insert("nrows".to_string(), Value::from(cap));
                        }
                    } else {
                        opts.insert("filters".to_string(), Value::Array(valid));
                    }
                }
                Value::Array(items) => {
                    opts.insert("filters".to_string(), Value::Array(items));
                }
                Value::Null => {}
                other => {
                    issues.push(format!("filters must be a list, got {}; removed", other));
                }
            }
        }

        self.apply_safety_limits(opts, &mut issues);

        if !issues.is_empty() {
            tracing::warn!(target: "triage::tool", issues = ?issues, "read options adjusted");
        }
        issues
    }

    fn validate_filters(&self, items: Vec<Value>, issues: &mut Vec<String>) -> Vec<Value> {
        let mut valid = Vec::new();
        for item in items {
            let parts = match item.as_array() {
                Some(p) if p.len() == 3 => p.clone(),
                _ => {
                    issues.push(format!("malformed filter dropped: {}", item));
                    continue;
                }
            };
            let column = match parts[0].as_str() {
                Some(c) => c.to_string(),
                None => {
                    issues.push(format!("filter column must be a string, dropped: {}", item));
                    continue;
                }
            };
            let raw_op = parts[1].as_str().unwrap_or_default().trim().to_lowercase();
            let op = match FilterOp::parse(&raw_op) {
                Some(op) => op,
                None if PATTERN_OPS.contains(&raw_op.as_str()) => {
                    issues.push(format!(
                        "unsupported operator '{}', filter dropped: {}",
                        raw_op, item
                    ));
                    continue;
                }
                None => {
                    issues.push(format!("unknown operator '{}', replaced with '=='", raw_op));
                    FilterOp::Eq
                }
            };
            if parts[2].is_null() {
                issues.push(format!("filter value is null, dropped: {}", item));
                continue;
            }
            let value = self.normalize_value(&column, parts[2].clone(), issues);
            valid.push(Value::Array(vec![
                Value::String(column),
                Value::String(op.as_str().to_string()),
                value,
            ]));
        }
        valid
    }

    fn normalize_value(&self, column: &str, value: Value, issues: &mut Vec<String>) -> Value {
        match value {
            Value::String(s) if is_timestamp_like(column, &s) => {
                let fixed = normalize_timestamp(&s);
                if fixed != s {
                    issues.push(format!("timestamp normalized: {} -> {}", s, fixed));
                }
                Value::String(fixed)
            }
            Value::Array(items) => Value::Array(
                items
                    .into_iter()
                    .map(|v| self.normalize_value(column, v, issues))
                    .collect(),
            ),
            other => other,
        }
    }

    fn apply_safety_limits(&self, opts: &mut Map<String, Value>, issues: &mut Vec<String>) {
        let s = &self.settings;
        match opts.get("nrows").and_then(Value::as_u64) {
            None => {
                let has_filters = opts
                    .get("filters")
                    .and_then(Value::as_array)
                    .is_some_and(|f| !f.is_empty());
                let cap = if has_filters {
                    s.default_nrows
                } else {
                    s.default_nrows * 4 / 5
                };
                opts.insert("nrows".to_string(), Value::from(cap));
                tracing::debug!(target: "triage::tool", nrows = cap, "row cap injected");
            }
            Some(n) if n as usize > s.max_safe_rows => {
                issues.push(format!("nrows {} exceeds limit, reduced to {}", n, s.max_safe_rows));
                opts.insert("nrows".to_string(), Value::from(s.max_safe_rows));
            }
            Some(_) => {}
        }

        let columns: Option<Vec<String>> = opts.get("columns").and_then(Value::as_array).map(|cols| {
            cols.iter()
                .filter_map(|c| c.as_str().map(String::from))
                .collect()
        });
        if let Some(cols) = columns {
            if cols.len() > s.max_columns {
                let mut selected: Vec<String> = s
                    .priority_columns
                    .iter()
                    .filter(|p| cols.contains(p))
                    .cloned()
                    .collect();
                for c in &cols {
                    if selected.len() >= s.max_columns {
                        break;
                    }
                    if !selected.contains(c) {
                        selected.push(c.clone());
                    }
                }
                issues.push(format!(
                    "{} columns requested, trimmed to {}",
                    cols.len(),
                    selected.len()
                ));
                opts.insert(
                    "columns".to_string(),
                    Value::Array(selected.into_iter().map(Value::String).collect()),
                );
            }
        }
    }
}

fn is_timestamp_like(column: &str, value: &str) -> bool {
    static TS_RE: OnceLock<Regex> = OnceLock::new();
    let re = TS_RE.get_or_init(|| Regex::new(r"^\s*\d{4}-\d{2}-\d{2}[T ]\d{2}:\d{2}").unwrap());
    column.to_lowercase().contains("timestamp") || re.is_match(value)
}

/// 时间戳规整：去掉结尾 Z，小数秒截断到 6 位；非 ISO / 标准格式时尝试解析为 `%Y-%m-%d %H:%M:%S`
pub fn normalize_timestamp(raw: &str) -> String {
    static ISO_RE: OnceLock<Regex> = OnceLock::new();
    let re = ISO_RE.get_or_init(|| Regex::new(r"^\d{4}-\d{2}-\d{2}[T ]\d{2}:\d{2}:\d{2}").unwrap());

    let mut fixed = raw.trim().to_string();
    if fixed.ends_with('Z') {
        fixed.pop();
    }
    if let Some((main, frac)) = fixed.rsplit_once('.') {
        if frac.len() > 6 && frac.chars().all(|c| c.is_ascii_digit()) {
            fixed = format!("{}.{}", main, &frac[..6]);
        }
    }
    if re.is_match(&fixed) {
        return fixed;
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y/%m/%d %H:%M:%S"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(&fixed, fmt).ok())
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| raw.to_string())
}
