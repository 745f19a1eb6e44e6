//! 预览工具：文件结构与前几行样本

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::tools::registry::{PreviewData, Tool, ToolError, ToolPayload};
use crate::tools::table::{ReadOptions, TableReader};

pub const PREVIEW_TOOL: &str = "preview_table";

/// 超过该大小（MB）时提示限制读取
const LARGE_FILE_MB: f64 = 50.0;

pub struct PreviewTableTool {
    reader: Arc<dyn TableReader>,
    preview_rows: usize,
    mapping_param: String,
}

impl PreviewTableTool {
    pub fn new(reader: Arc<dyn TableReader>, preview_rows: usize, mapping_param: impl Into<String>) -> Self {
        Self {
            reader,
            preview_rows: preview_rows.max(1),
            mapping_param: mapping_param.into(),
        }
    }
}

#[async_trait]
impl Tool for PreviewTableTool {
    fn name(&self) -> &str {
        PREVIEW_TOOL
    }

    fn description(&self) -> &str {
        "Preview a data file: columns, types, null counts and the first few rows. \
         Parameters: <file_path>path</file_path>, optional <read_options>{'columns': [...]}</read_options>"
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "file_path": {"type": "string"},
                self.mapping_param.clone(): {"type": "object"}
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

        let mut options = match params.get(&self.mapping_param).and_then(Value::as_object) {
            Some(map) => ReadOptions::from_json(map)?,
            None => ReadOptions::default(),
        };
        // 预览统计整个文件，样本另取前几行
        options.nrows = None;

        let table = self.reader.read_table(file_path, &options).await?;
        let file_size_mb = self
            .reader
            .file_size(file_path)
            .await
            .map(|b| (b as f64 / (1024.0 * 1024.0) * 100.0).round() / 100.0);
        let warning = file_size_mb.filter(|mb| *mb > LARGE_FILE_MB).map(|mb| {
            format!("Large file ({:.1}MB), limit rows or columns when querying", mb)
        });

        tracing::debug!(target: "triage::tool", file = %file_path, rows = table.rows.len(), "preview");
        Ok(ToolPayload::Preview(PreviewData {
            file_path: file_path.to_string(),
            file_size_mb,
            shape: table.shape(),
            columns: table.columns.clone(),
            dtypes: table.dtypes(),
            sample: table.head(self.preview_rows).to_vec(),
            null_counts: table.null_counts(),
            warning,
        }))
    }
}
