//! 工具层：调用协议、参数校验、表格读取、三个诊断工具与带降级的执行器

pub mod completion;
pub mod executor;
pub mod literal;
pub mod preview;
pub mod protocol;
pub mod query;
pub mod registry;
pub mod table;
pub mod validator;

pub use completion::{validate_finding, CompletionTool, COMPLETION_TOOL, RESULT_PARAM};
pub use executor::{suggestion_for, ToolExecutor};
pub use preview::{PreviewTableTool, PREVIEW_TOOL};
pub use protocol::{ToolCall, ToolProtocol};
pub use query::{QueryTableTool, QUERY_TOOL};
pub use registry::{PreviewData, RowsData, Tool, ToolError, ToolPayload, ToolRegistry, ToolResult};
pub use table::{FileTableReader, Filter, FilterOp, ReadOptions, Row, Table, TableError, TableReader};
pub use validator::{ParameterValidator, ValidatorSettings};
