//! 表数据读取能力
//!
//! TableReader 是诊断工具唯一依赖的数据源抽象：`read_table(path, options) -> Table | TableError`。
//! ReadOptions 的过滤 / 列投影 / 行数上限由 `ReadOptions::apply` 统一实现，具体格式读取器只负责把文件载入为行。
//! FileTableReader 读取沙箱根目录下的 CSV / JSON 数组 / JSON Lines / Parquet 文件。

use std::cmp::Ordering;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime};
use polars::prelude::{AnyValue, ParquetReader, SerReader};
use serde_json::{Map, Value};
use thiserror::Error;

/// 一行数据：列名 -> 值
pub type Row = Map<String, Value>;

/// 读取错误
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TableError {
    #[error("File not found: {0}")]
    NotFound(String),

    #[error("Path escapes data root: {0}")]
    OutsideRoot(String),

    #[error("Columns not found: {}", .0.join(", "))]
    MissingColumns(Vec<String>),

    #[error("Malformed filters: {0}")]
    MalformedFilter(String),

    #[error("Unsupported file format: {0}")]
    Unsupported(String),

    #[error("Failed to parse {path}: {reason}")]
    Parse { path: String, reason: String },

    #[error("IO error: {0}")]
    Io(String),
}

/// 过滤操作符（固定支持集合）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    In,
    NotIn,
}

impl FilterOp {
    /// 接受规范写法与 `=` / `<>` 别名
    pub fn parse(op: &str) -> Option<Self> {
        match op.trim().to_lowercase().as_str() {
            "==" | "=" => Some(Self::Eq),
            "!=" | "<>" => Some(Self::Ne),
            "<" => Some(Self::Lt),
            "<=" => Some(Self::Le),
            ">" => Some(Self::Gt),
            ">=" => Some(Self::Ge),
            "in" => Some(Self::In),
            "not in" => Some(Self::NotIn),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::In => "in",
            Self::NotIn => "not in",
        }
    }
}

/// 单个过滤条件 (column, op, value)
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    pub column: String,
    pub op: FilterOp,
    pub value: Value,
}

impl Filter {
    pub fn new(column: impl Into<String>, op: FilterOp, value: Value) -> Self {
        Self {
            column: column.into(),
            op,
            value,
        }
    }

    fn matches(&self, row: &Row) -> Result<bool, TableError> {
        let cell = row.get(&self.column).unwrap_or(&Value::Null);
        match self.op {
            FilterOp::Eq => Ok(loose_eq(cell, &self.value)),
            FilterOp::Ne => Ok(!loose_eq(cell, &self.value)),
            FilterOp::In | FilterOp::NotIn => {
                let items = self.value.as_array().ok_or_else(|| {
                    TableError::MalformedFilter(format!(
                        "'{}' expects a list value for column '{}'",
                        self.op.as_str(),
                        self.column
                    ))
                })?;
                let found = items.iter().any(|v| loose_eq(cell, v));
                Ok(if self.op == FilterOp::In { found } else { !found })
            }
            FilterOp::Lt | FilterOp::Le | FilterOp::Gt | FilterOp::Ge => {
                if cell.is_null() {
                    return Ok(false);
                }
                let ord = compare(cell, &self.value).ok_or_else(|| {
                    TableError::MalformedFilter(format!(
                        "cannot compare column '{}' value {} with {}",
                        self.column, cell, self.value
                    ))
                })?;
                Ok(match self.op {
                    FilterOp::Lt => ord == Ordering::Less,
                    FilterOp::Le => ord != Ordering::Greater,
                    FilterOp::Gt => ord == Ordering::Greater,
                    _ => ord != Ordering::Less,
                })
            }
        }
    }
}

/// 读取选项：行数上限、列投影、过滤条件
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReadOptions {
    pub nrows: Option<usize>,
    pub columns: Option<Vec<String>>,
    pub filters: Option<Vec<Filter>>,
}

impl ReadOptions {
    /// 从已校验的 JSON 映射构造；结构不合法的过滤条件报 MalformedFilter
    pub fn from_json(map: &Map<String, Value>) -> Result<Self, TableError> {
        let nrows = match map.get("nrows") {
            None | Some(Value::Null) => None,
            Some(v) => Some(
                v.as_u64()
                    .map(|n| n as usize)
                    .ok_or_else(|| TableError::Parse {
                        path: "read_options".to_string(),
                        reason: format!("nrows must be a non-negative integer, got {}", v),
                    })?,
            ),
        };

        let columns = match map.get("columns") {
            None | Some(Value::Null) => None,
            Some(Value::Array(items)) => Some(
                items
                    .iter()
                    .map(|c| match c {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    })
                    .collect(),
            ),
            Some(Value::String(s)) => Some(vec![s.clone()]),
            Some(other) => {
                return Err(TableError::Parse {
                    path: "read_options".to_string(),
                    reason: format!("columns must be a list, got {}", other),
                })
            }
        };

        let filters = match map.get("filters") {
            None | Some(Value::Null) => None,
            Some(Value::Array(items)) => Some(
                items
                    .iter()
                    .map(filter_from_json)
                    .collect::<Result<Vec<_>, _>>()?,
            ),
            Some(other) => {
                return Err(TableError::MalformedFilter(format!(
                    "filters must be a list, got {}",
                    other
                )))
            }
        };

        Ok(Self {
            nrows,
            columns,
            filters,
        })
    }

    /// 过滤 -> 投影 -> 截断
    pub fn apply(&self, table: Table) -> Result<Table, TableError> {
        if let Some(filters) = &self.filters {
            if let Some(f) = filters.iter().find(|f| !table.columns.contains(&f.column)) {
                return Err(TableError::MalformedFilter(format!(
                    "filter column '{}' does not exist",
                    f.column
                )));
            }
        }
        if let Some(cols) = &self.columns {
            let missing: Vec<String> = cols
                .iter()
                .filter(|c| !table.columns.contains(c))
                .cloned()
                .collect();
            if !missing.is_empty() {
                return Err(TableError::MissingColumns(missing));
            }
        }

        let limit = self.nrows.unwrap_or(usize::MAX);
        let filters = self.filters.as_deref().unwrap_or(&[]);
        let mut rows = Vec::new();
        for row in table.rows {
            if rows.len() >= limit {
                break;
            }
            let mut keep = true;
            for f in filters {
                if !f.matches(&row)? {
                    keep = false;
                    break;
                }
            }
            if keep {
                rows.push(row);
            }
        }

        let columns = match &self.columns {
            Some(cols) => {
                rows = rows
                    .into_iter()
                    .map(|row| {
                        cols.iter()
                            .map(|c| (c.clone(), row.get(c).cloned().unwrap_or(Value::Null)))
                            .collect()
                    })
                    .collect();
                cols.clone()
            }
            None => table.columns,
        };

        Ok(Table { columns, rows })
    }
}

fn filter_from_json(item: &Value) -> Result<Filter, TableError> {
    let parts = item
        .as_array()
        .filter(|p| p.len() == 3)
        .ok_or_else(|| TableError::MalformedFilter(format!("filter must be (column, op, value): {}", item)))?;
    let column = parts[0]
        .as_str()
        .ok_or_else(|| TableError::MalformedFilter(format!("filter column must be a string: {}", item)))?;
    let op_raw = parts[1]
        .as_str()
        .ok_or_else(|| TableError::MalformedFilter(format!("filter operator must be a string: {}", item)))?;
    let op = FilterOp::parse(op_raw)
        .ok_or_else(|| TableError::MalformedFilter(format!("unsupported operator '{}'", op_raw)))?;
    Ok(Filter::new(column, op, parts[2].clone()))
}

/// 内存中的表
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    pub columns: Vec<String>,
    pub rows: Vec<Row>,
}

impl Table {
    /// 由行构造，列顺序取首次出现顺序
    pub fn from_rows(rows: Vec<Row>) -> Self {
        let mut columns: Vec<String> = Vec::new();
        for row in &rows {
            for key in row.keys() {
                if !columns.contains(key) {
                    columns.push(key.clone());
                }
            }
        }
        Self { columns, rows }
    }

    /// (行数, 列数)
    pub fn shape(&self) -> (usize, usize) {
        (self.rows.len(), self.columns.len())
    }

    pub fn head(&self, n: usize) -> &[Row] {
        &self.rows[..n.min(self.rows.len())]
    }

    /// 每列的空值数
    pub fn null_counts(&self) -> Map<String, Value> {
        self.columns
            .iter()
            .map(|c| {
                let n = self
                    .rows
                    .iter()
                    .filter(|r| r.get(c).map_or(true, Value::is_null))
                    .count();
                (c.clone(), Value::from(n))
            })
            .collect()
    }

    /// 粗略的列类型（取首个非空值）
    pub fn dtypes(&self) -> Map<String, Value> {
        self.columns
            .iter()
            .map(|c| {
                let kind = self
                    .rows
                    .iter()
                    .filter_map(|r| r.get(c))
                    .find(|v| !v.is_null())
                    .map(|v| match v {
                        Value::Bool(_) => "bool",
                        Value::Number(n) if n.is_f64() => "float",
                        Value::Number(_) => "int",
                        Value::String(_) => "string",
                        Value::Array(_) | Value::Object(_) => "object",
                        Value::Null => "null",
                    })
                    .unwrap_or("null");
                (c.clone(), Value::from(kind))
            })
            .collect()
    }
}

/// 表读取能力
#[async_trait]
pub trait TableReader: Send + Sync {
    async fn read_table(&self, path: &str, options: &ReadOptions) -> Result<Table, TableError>;

    /// 文件大小（字节），未知时返回 None
    async fn file_size(&self, _path: &str) -> Option<u64> {
        None
    }
}

/// 沙箱内的文件表读取器
#[derive(Debug, Clone)]
pub struct FileTableReader {
    root_dir: PathBuf,
}

impl FileTableReader {
    pub fn new(root_dir: impl AsRef<Path>) -> Self {
        let root = root_dir.as_ref().to_path_buf();
        let root_dir = root.canonicalize().unwrap_or(root);
        Self { root_dir }
    }

    /// 解析并校验路径在根目录下（禁止 ../ 逃逸）
    ///
    /// 相对路径先按根目录解析，再按工作目录解析：文件发现列出的是 `<base>/processed_data/...` 形式的路径。
    pub fn resolve(&self, path: &str) -> Result<PathBuf, TableError> {
        let trimmed = path.trim().trim_start_matches("./");
        let canonical = [self.root_dir.join(trimmed), PathBuf::from(trimmed)]
            .iter()
            .find_map(|p| p.canonicalize().ok())
            .ok_or_else(|| TableError::NotFound(path.to_string()))?;
        if canonical.starts_with(&self.root_dir) {
            Ok(canonical)
        } else {
            Err(TableError::OutsideRoot(path.to_string()))
        }
    }
}

#[async_trait]
impl TableReader for FileTableReader {
    async fn read_table(&self, path: &str, options: &ReadOptions) -> Result<Table, TableError> {
        let resolved = self.resolve(path)?;
        let display = path.to_string();
        let table = tokio::task::spawn_blocking(move || load_file(&resolved, &display))
            .await
            .map_err(|e| TableError::Io(e.to_string()))??;
        options.apply(table)
    }

    async fn file_size(&self, path: &str) -> Option<u64> {
        let resolved = self.resolve(path).ok()?;
        tokio::fs::metadata(resolved).await.ok().map(|m| m.len())
    }
}

fn load_file(path: &Path, display: &str) -> Result<Table, TableError> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_lowercase)
        .unwrap_or_default();
    match ext.as_str() {
        "csv" => load_csv(path, display),
        "json" => load_json(path, display),
        "jsonl" | "ndjson" => load_jsonl(path, display),
        "parquet" => load_parquet(path, display),
        other => Err(TableError::Unsupported(format!("{} (.{})", display, other))),
    }
}

fn parse_err(display: &str, reason: impl ToString) -> TableError {
    TableError::Parse {
        path: display.to_string(),
        reason: reason.to_string(),
    }
}

fn load_csv(path: &Path, display: &str) -> Result<Table, TableError> {
    let mut reader = csv::Reader::from_path(path).map_err(|e| TableError::Io(e.to_string()))?;
    let headers: Vec<String> = reader
        .headers()
        .map_err(|e| parse_err(display, e))?
        .iter()
        .map(String::from)
        .collect();

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|e| parse_err(display, e))?;
        let row: Row = headers
            .iter()
            .zip(record.iter())
            .map(|(h, cell)| (h.clone(), csv_cell(cell)))
            .collect();
        rows.push(row);
    }
    Ok(Table {
        columns: headers,
        rows,
    })
}

/// CSV 单元格：空串为 null，数字按数字处理，其余保留字符串
fn csv_cell(cell: &str) -> Value {
    if cell.is_empty() {
        return Value::Null;
    }
    if let Ok(i) = cell.parse::<i64>() {
        return Value::from(i);
    }
    if let Ok(f) = cell.parse::<f64>() {
        if f.is_finite() {
            return Value::from(f);
        }
    }
    Value::String(cell.to_string())
}

fn load_json(path: &Path, display: &str) -> Result<Table, TableError> {
    let text = std::fs::read_to_string(path).map_err(|e| TableError::Io(e.to_string()))?;
    let value: Value = serde_json::from_str(&text).map_err(|e| parse_err(display, e))?;
    let items = match value {
        Value::Array(items) => items,
        _ => return Err(parse_err(display, "expected a JSON array of objects")),
    };
    rows_from_values(items, display)
}

fn load_jsonl(path: &Path, display: &str) -> Result<Table, TableError> {
    let text = std::fs::read_to_string(path).map_err(|e| TableError::Io(e.to_string()))?;
    let mut items = Vec::new();
    for (i, line) in text.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let v: Value = serde_json::from_str(line)
            .map_err(|e| parse_err(display, format!("line {}: {}", i + 1, e)))?;
        items.push(v);
    }
    rows_from_values(items, display)
}

fn load_parquet(path: &Path, display: &str) -> Result<Table, TableError> {
    let file = std::fs::File::open(path).map_err(|e| TableError::Io(e.to_string()))?;
    let df = ParquetReader::new(file).finish().map_err(|e| parse_err(display, e))?;
    let columns: Vec<String> = df.get_column_names().iter().map(|c| c.to_string()).collect();

    let mut rows = Vec::with_capacity(df.height());
    for i in 0..df.height() {
        let mut row = Row::new();
        for series in df.get_columns() {
            let cell = series.get(i).map_err(|e| parse_err(display, e))?;
            row.insert(series.name().to_string(), any_value_to_json(cell));
        }
        rows.push(row);
    }
    Ok(Table { columns, rows })
}

/// Parquet 单元格转 JSON；时间等其他类型按展示文本处理
fn any_value_to_json(v: AnyValue<'_>) -> Value {
    match v {
        AnyValue::Null => Value::Null,
        AnyValue::Boolean(b) => Value::Bool(b),
        AnyValue::Int32(x) => Value::from(x),
        AnyValue::Int64(x) => Value::from(x),
        AnyValue::UInt32(x) => Value::from(x),
        AnyValue::UInt64(x) => Value::from(x),
        AnyValue::Float32(x) => serde_json::Number::from_f64(x as f64).map_or(Value::Null, Value::Number),
        AnyValue::Float64(x) => serde_json::Number::from_f64(x).map_or(Value::Null, Value::Number),
        AnyValue::String(s) => Value::String(s.to_string()),
        AnyValue::StringOwned(s) => Value::String(s.to_string()),
        other => csv_cell(&other.to_string()),
    }
}

fn rows_from_values(items: Vec<Value>, display: &str) -> Result<Table, TableError> {
    let rows = items
        .into_iter()
        .map(|v| match v {
            Value::Object(map) => Ok(map),
            other => Err(parse_err(display, format!("row is not an object: {}", other))),
        })
        .collect::<Result<Vec<Row>, _>>()?;
    Ok(Table::from_rows(rows))
}

/// 解析常见时间戳写法（带 Z / 时区偏移 / 空格分隔 / 小数秒）
pub fn parse_timestamp(s: &str) -> Option<NaiveDateTime> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.naive_utc());
    }
    let s = s.strip_suffix('Z').unwrap_or(s);
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
}

fn as_number(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    }
}

fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::String(x), Value::String(y)) => match (parse_timestamp(x), parse_timestamp(y)) {
            (Some(tx), Some(ty)) => Some(tx.cmp(&ty)),
            _ => Some(x.cmp(y)),
        },
        _ => as_number(a)?.partial_cmp(&as_number(b)?),
    }
}

fn loose_eq(a: &Value, b: &Value) -> bool {
    if a == b {
        return true;
    }
    match (a, b) {
        (Value::Number(_), Value::String(_)) | (Value::String(_), Value::Number(_)) => {
            matches!((as_number(a), as_number(b)), (Some(x), Some(y)) if x == y)
        }
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        (Value::String(x), Value::String(y)) => {
            matches!((parse_timestamp(x), parse_timestamp(y)), (Some(tx), Some(ty)) if tx == ty)
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> Table {
        let rows = vec![
            json!({"@timestamp": "2025-06-06T10:00:00Z", "level": "INFO", "k8_pod": "cart-0", "latency": 12}),
            json!({"@timestamp": "2025-06-06T10:05:00Z", "level": "ERROR", "k8_pod": "cart-1", "latency": 950}),
            json!({"@timestamp": "2025-06-06T10:10:00Z", "level": "ERROR", "k8_pod": "checkout-0", "latency": 40}),
        ];
        Table::from_rows(
            rows.into_iter()
                .map(|v| v.as_object().cloned().unwrap())
                .collect(),
        )
    }

    fn opts(v: Value) -> ReadOptions {
        ReadOptions::from_json(v.as_object().unwrap()).unwrap()
    }

    #[test]
    fn test_filter_project_and_limit() {
        let out = opts(json!({
            "filters": [["level", "==", "ERROR"]],
            "columns": ["k8_pod"],
            "nrows": 1
        }))
        .apply(sample())
        .unwrap();
        assert_eq!(out.columns, vec!["k8_pod"]);
        assert_eq!(out.rows.len(), 1);
        assert_eq!(out.rows[0]["k8_pod"], json!("cart-1"));
    }

    #[test]
    fn test_timestamp_and_membership_filters() {
        let out = opts(json!({
            "filters": [
                ["@timestamp", ">", "2025-06-06 10:01:00"],
                ["k8_pod", "not in", ["cart-1"]]
            ]
        }))
        .apply(sample())
        .unwrap();
        assert_eq!(out.rows.len(), 1);
        assert_eq!(out.rows[0]["k8_pod"], json!("checkout-0"));
    }

    #[test]
    fn test_numeric_compare_accepts_string_value() {
        let out = opts(json!({"filters": [["latency", ">=", "40"]]}))
            .apply(sample())
            .unwrap();
        assert_eq!(out.rows.len(), 2);
    }

    #[test]
    fn test_missing_columns_reported() {
        let err = opts(json!({"columns": ["nope", "level"]}))
            .apply(sample())
            .unwrap_err();
        assert_eq!(err, TableError::MissingColumns(vec!["nope".to_string()]));
    }

    #[test]
    fn test_malformed_filters() {
        let err = opts(json!({"filters": [["ghost", "==", 1]]}))
            .apply(sample())
            .unwrap_err();
        assert!(matches!(err, TableError::MalformedFilter(_)));

        let err = opts(json!({"filters": [["k8_pod", "in", "cart-0"]]}))
            .apply(sample())
            .unwrap_err();
        assert!(matches!(err, TableError::MalformedFilter(_)));

        let err = ReadOptions::from_json(
            json!({"filters": [["level", "like", "ERR%"]]})
                .as_object()
                .unwrap(),
        )
        .unwrap_err();
        assert!(err.to_string().starts_with("Malformed filters"));
    }

    #[tokio::test]
    async fn test_file_reader_formats_and_sandbox() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.csv"), "level,latency\nINFO,1\nERROR,\n").unwrap();
        std::fs::write(
            dir.path().join("b.jsonl"),
            "{\"level\":\"INFO\"}\n\n{\"level\":\"WARN\",\"pod\":\"x\"}\n",
        )
        .unwrap();
        std::fs::write(dir.path().join("c.parquet"), b"PAR1").unwrap();
        std::fs::write(dir.path().join("d.xlsx"), b"x").unwrap();

        let reader = FileTableReader::new(dir.path());
        let csv = reader.read_table("a.csv", &ReadOptions::default()).await.unwrap();
        assert_eq!(csv.shape(), (2, 2));
        assert_eq!(csv.rows[0]["latency"], json!(1));
        assert!(csv.rows[1]["latency"].is_null());

        let jsonl = reader.read_table("./b.jsonl", &ReadOptions::default()).await.unwrap();
        assert_eq!(jsonl.columns, vec!["level", "pod"]);

        let abs = dir.path().join("b.jsonl");
        assert!(reader
            .read_table(abs.to_str().unwrap(), &ReadOptions::default())
            .await
            .is_ok());

        assert!(matches!(
            reader.read_table("c.parquet", &ReadOptions::default()).await,
            Err(TableError::Parse { .. })
        ));
        assert!(matches!(
            reader.read_table("d.xlsx", &ReadOptions::default()).await,
            Err(TableError::Unsupported(_))
        ));
        assert!(matches!(
            reader.read_table("missing.csv", &ReadOptions::default()).await,
            Err(TableError::NotFound(_))
        ));
        assert!(matches!(
            reader.read_table("../../etc/passwd", &ReadOptions::default()).await,
            Err(TableError::OutsideRoot(_)) | Err(TableError::NotFound(_))
        ));
    }

    fn write_log_parquet(path: &Path) {
        let mut df = polars::prelude::df!(
            "@timestamp" => &["2025-06-06T10:00:00Z", "2025-06-06T10:01:00Z", "2025-06-06T10:02:00Z"],
            "level" => &["INFO", "ERROR", "ERROR"],
            "k8_pod" => &["cart-0", "cart-1", "checkout-0"],
            "latency" => &[12i64, 950, 40]
        )
        .unwrap();
        let file = std::fs::File::create(path).unwrap();
        polars::prelude::ParquetWriter::new(file).finish(&mut df).unwrap();
    }

    #[tokio::test]
    async fn test_parquet_rows_and_filters() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("log-parquet")).unwrap();
        write_log_parquet(&dir.path().join("log-parquet/log.parquet"));

        let reader = FileTableReader::new(dir.path());
        let all = reader
            .read_table("log-parquet/log.parquet", &ReadOptions::default())
            .await
            .unwrap();
        assert_eq!(all.columns, vec!["@timestamp", "level", "k8_pod", "latency"]);
        assert_eq!(all.shape(), (3, 4));
        assert_eq!(all.rows[1]["latency"], json!(950));
        assert_eq!(all.rows[2]["k8_pod"], json!("checkout-0"));

        let opts = ReadOptions {
            filters: Some(vec![Filter::new("level", FilterOp::Eq, json!("ERROR"))]),
            ..ReadOptions::default()
        };
        let errors = reader.read_table("log-parquet/log.parquet", &opts).await.unwrap();
        assert_eq!(errors.shape().0, 2);
    }

    #[tokio::test]
    async fn test_resolve_accepts_paths_prefixed_with_root() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("processed_data")).unwrap();
        std::fs::write(dir.path().join("processed_data/a.csv"), "x\n1\n").unwrap();
        let reader = FileTableReader::new(dir.path());

        let listed = dir.path().join("processed_data/a.csv");
        assert!(reader.resolve(listed.to_str().unwrap()).is_ok());
        assert!(reader.resolve("processed_data/a.csv").is_ok());
        let outside = tempfile::tempdir().unwrap();
        std::fs::write(outside.path().join("b.csv"), "x\n").unwrap();
        assert!(matches!(
            reader.resolve(outside.path().join("b.csv").to_str().unwrap()),
            Err(TableError::OutsideRoot(_))
        ));
    }
}
