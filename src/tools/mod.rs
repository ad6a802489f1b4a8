pub mod code;
pub mod datasets;
pub mod executor;
pub mod frame;
pub mod registry;
pub mod schema;

pub use code::RunCodeTool;
pub use datasets::{DatasetDir, DescribeDatasetTool, ListDatasetsTool};
pub use executor::ToolExecutor;
pub use frame::{DType, DataFrame};
pub use registry::{render_tool_error, Tool, ToolRegistry};
pub use schema::{args_schema, parse_args};
