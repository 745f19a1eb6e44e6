//! 查询工具：按过滤 / 列 / 行数读取数据，并对回显体量设上限

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::tools::registry::{RowsData, Tool, ToolError, ToolPayload};
use crate::tools::table::{ReadOptions, TableReader};

pub const QUERY_TOOL: &str = "query_table";

/// 载荷 token 估算比例（序列化字符数 / 3）
const PAYLOAD_CHARS_PER_TOKEN: usize = 3;
/// 超过该行数附带警告
const WARN_ROWS: usize = 300;
/// 建议行数的上限
const MAX_RECOMMENDED_ROWS: usize = 300;

pub struct QueryTableTool {
    reader: Arc<dyn TableReader>,
    max_payload_tokens: usize,
    mapping_param: String,
}

impl QueryTableTool {
    pub fn new(reader: Arc<dyn TableReader>, max_payload_tokens: usize, mapping_param: impl Into<String>) -> Self {
        Self {
            reader,
            max_payload_tokens,
            mapping_param: mapping_param.into(),
        }
    }
}

#[async_trait]
impl Tool for QueryTableTool {
    fn name(&self) -> &str {
        QUERY_TOOL
    }

    fn description(&self) -> &str {
        "Read rows from a data file. Parameters: <file_path>path</file_path>, \
         <read_options>{'nrows': 100, 'columns': ['@timestamp', 'message'], \
         'filters': [('level', '==', 'ERROR')]}</read_options>. \
         Supported operators: ==, !=, <, <=, >, >=, in, not in"
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "file_path": {"type": "string"},
                self.mapping_param.clone(): {
                    "type": "object",
                    "properties": {
                        "nrows": {"type": "integer"},
                        "columns": {"type": "array", "items": {"type": "string"}},
                        "filters": {"type": "array"}
                    }
                }
            },
            "required": ["file_path"]
        })
    }

    async fn execute(&self, params: &Map<String, Value>) -> Result<ToolPayload, ToolError> {
        let file_path = params
            .get("file_path")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .ok_or_else(|| ToolError::InvalidArguments("file_path is required".to_string()))?;
        let options = match params.get(&self.mapping_param).and_then(Value::as_object) {
            Some(map) => ReadOptions::from_json(map)?,
            None => ReadOptions::default(),
        };

        let table = self.reader.read_table(file_path, &options).await?;
        let (rows, columns) = table.shape();
        let serialized = serde_json::to_string(&table.rows).unwrap_or_default();
        let estimated_tokens = serialized.chars().count() / PAYLOAD_CHARS_PER_TOKEN;

        if estimated_tokens > self.max_payload_tokens {
            let recommended_rows =
                (self.max_payload_tokens / (columns.max(1) * 12)).min(MAX_RECOMMENDED_ROWS);
            tracing::warn!(
                target: "triage::tool",
                file = %file_path,
                estimated_tokens,
                rows,
                columns,
                "query payload too large"
            );
            return Err(ToolError::PayloadTooLarge {
                estimated_tokens,
                limit: self.max_payload_tokens,
                rows,
                columns,
                recommended_rows,
            });
        }

        let mut warnings = Vec::new();
        if rows > WARN_ROWS {
            warnings.push(format!(
                "Large dataset ({} rows), consider a smaller nrows or fewer columns",
                rows
            ));
        }
        let time_columns = table
            .columns
            .iter()
            .filter(|c| {
                let lower = c.to_lowercase();
                ["time", "timestamp", "date"].iter().any(|k| lower.contains(k))
            })
            .cloned()
            .collect();

        Ok(ToolPayload::Rows(RowsData {
            file_path: file_path.to_string(),
            shape: (rows, columns),
            columns: table.columns,
            rows: table.rows,
            estimated_tokens,
            time_columns,
            warnings,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::table::FileTableReader;
    use serde_json::json;

    fn write_logs(dir: &std::path::Path, n: usize) {
        let mut text = String::new();
        for i in 0..n {
            let level = if i % 10 == 0 { "ERROR" } else { "INFO" };
            text.push_str(&format!(
                "{{\"@timestamp\":\"2025-06-06T10:{:02}:00Z\",\"level\":\"{}\",\"message\":\"request {} handled by cartservice\"}}\n",
                i % 60,
                level,
                i
            ));
        }
        std::fs::write(dir.join("logs.jsonl"), text).unwrap();
    }

    #[tokio::test]
    async fn test_query_filters_rows() {
        let dir = tempfile::tempdir().unwrap();
        write_logs(dir.path(), 50);
        let tool = QueryTableTool::new(Arc::new(FileTableReader::new(dir.path())), 6000, "read_options");
        let params = json!({
            "file_path": "logs.jsonl",
            "read_options": {"filters": [["level", "==", "ERROR"]], "nrows": 100}
        });
        let ToolPayload::Rows(data) = tool.execute(params.as_object().unwrap()).await.unwrap() else {
            panic!("expected rows");
        };
        assert_eq!(data.shape, (5, 3));
        assert_eq!(data.time_columns, vec!["@timestamp"]);
        assert!(data.warnings.is_empty());
    }

    #[tokio::test]
    async fn test_query_payload_ceiling() {
        let dir = tempfile::tempdir().unwrap();
        write_logs(dir.path(), 400);
        let tool = QueryTableTool::new(Arc::new(FileTableReader::new(dir.path())), 6000, "read_options");
        let params = json!({"file_path": "logs.jsonl", "read_options": {"nrows": 400}});
        let err = tool.execute(params.as_object().unwrap()).await.unwrap_err();
        match err {
            ToolError::PayloadTooLarge { rows, columns, recommended_rows, .. } => {
                assert_eq!(rows, 400);
                assert_eq!(columns, 3);
                assert_eq!(recommended_rows, 166);
            }
            other => panic!("unexpected error {other:?}"),
        }
    }
}
