//! 数据集工具：list_datasets / describe_dataset
//!
//! DatasetDir 绑定数据目录，只读取其下一层的 `*.csv` 文件；文件名不得包含路径分隔符或 `..`。
//! 两个工具都把失败写成文本返回，不向调用方抛错。

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::Value;

use crate::core::AgentError;
use crate::tools::frame::DataFrame;
use crate::tools::schema::{args_schema, parse_args};
use crate::tools::Tool;

pub const CSV_EXTENSION: &str = ".csv";
pub const NO_DATASETS: &str = "No CSV files found in the data directory.";

/// 数据目录
#[derive(Debug, Clone)]
pub struct DatasetDir {
    root: PathBuf,
    preview_rows: usize,
    column_info_threshold: usize,
}

impl DatasetDir {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            preview_rows: 5,
            column_info_threshold: 5,
        }
    }

    pub fn with_preview_rows(mut self, rows: usize) -> Self {
        self.preview_rows = rows;
        self
    }

    pub fn with_column_info_threshold(mut self, columns: usize) -> Self {
        self.column_info_threshold = columns;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// 数据目录下的 CSV 文件名（保持目录遍历顺序）
    pub fn csv_files(&self) -> std::io::Result<Vec<String>> {
        let mut files = Vec::new();
        for entry in std::fs::read_dir(&self.root)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().to_string();
            // 跟随符号链接，与 describe_dataset 的判断一致
            if name.ends_with(CSV_EXTENSION) && entry.path().is_file() {
                files.push(name);
            }
        }
        Ok(files)
    }

    /// 校验文件名并拼出完整路径；拒绝子目录与 `..`
    pub fn resolve(&self, filename: &str) -> Result<PathBuf, AgentError> {
        let name = filename.trim();
        let plain = !name.is_empty()
            && name != "."
            && name != ".."
            && !name.contains('/')
            && !name.contains('\\')
            && Path::new(name).is_relative();
        if !plain {
            return Err(AgentError::PathEscape(filename.to_string()));
        }
        Ok(self.root.join(name))
    }

    /// 列出数据集；空目录返回固定提示
    pub fn list_datasets(&self) -> String {
        match self.csv_files() {
            Ok(files) if files.is_empty() => NO_DATASETS.to_string(),
            Ok(files) => format!("📁 **Available CSV files:**\n- {}", files.join("\n- ")),
            Err(e) => format!("Error listing CSV files: {}", e),
        }
    }

    /// 数据集概览：行列数、前几行预览；列数超过阈值时附带每列类型
    pub fn describe_dataset(&self, filename: &str) -> String {
        let path = match self.resolve(filename) {
            Ok(p) => p,
            Err(_) => return format!("Invalid filename '{}'.", filename),
        };
        if !path.is_file() {
            return format!("File '{}' not found.", filename);
        }
        let df = match DataFrame::from_csv_path(&path) {
            Ok(df) => df,
            Err(e) => return format!("Error reading {}: {}", filename, e),
        };
        let (rows, cols) = df.shape();
        let mut info = vec![
            format!("📊 **Dataset:** `{}`", filename),
            format!("Rows × Columns: {} × {}", rows, cols),
            "\n**Preview:**".to_string(),
            df.head(self.preview_rows),
        ];
        if cols > self.column_info_threshold {
            info.push("\n**Column Info:**".to_string());
            info.push(df.dtypes_summary());
        }
        info.join("\n")
    }
}

#[allow(dead_code)]
#[derive(Debug, Deserialize, JsonSchema)]
struct NoArgs {}

/// describe_dataset 参数
#[derive(Debug, Deserialize, JsonSchema)]
struct DescribeArgs {
    /// CSV file name inside the data directory, e.g. "sales.csv"
    filename: String,
}

/// list_datasets 工具
pub struct ListDatasetsTool {
    dir: DatasetDir,
}

impl ListDatasetsTool {
    pub fn new(dir: DatasetDir) -> Self {
        Self { dir }
    }
}

#[async_trait]
impl Tool for ListDatasetsTool {
    fn name(&self) -> &str {
        "list_datasets"
    }

    fn description(&self) -> &str {
        "List all CSV datasets in the data directory."
    }

    fn parameters_schema(&self) -> Value {
        args_schema::<NoArgs>()
    }

    async fn execute(&self, _args: Value) -> Result<String, String> {
        Ok(self.dir.list_datasets())
    }
}

/// describe_dataset 工具
pub struct DescribeDatasetTool {
    dir: DatasetDir,
}

impl DescribeDatasetTool {
    pub fn new(dir: DatasetDir) -> Self {
        Self { dir }
    }
}

#[async_trait]
impl Tool for DescribeDatasetTool {
    fn name(&self) -> &str {
        "describe_dataset"
    }

    fn description(&self) -> &str {
        "Preview the first 5 rows of a CSV dataset and show its shape; column types are included for wide tables."
    }

    fn parameters_schema(&self) -> Value {
        args_schema::<DescribeArgs>()
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        let args: DescribeArgs = parse_args(args)?;
        let dir = self.dir.clone();
        // CSV 读取是阻塞 IO，放到 blocking 线程
        tokio::task::spawn_blocking(move || dir.describe_dataset(&args.filename))
            .await
            .map_err(|e| e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(dir: &Path, name: &str, content: &str) {
        std::fs::write(dir.join(name), content).unwrap();
    }

    #[test]
    fn test_list_empty_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = DatasetDir::new(tmp.path());
        assert_eq!(dir.list_datasets(), NO_DATASETS);
    }

    #[test]
    fn test_list_only_csv_files_once() {
        let tmp = tempfile::tempdir().unwrap();
        write(tmp.path(), "sales.csv", "a\n1\n");
        write(tmp.path(), "notes.txt", "x");
        write(tmp.path(), "users.csv", "b\n2\n");
        std::fs::create_dir(tmp.path().join("nested.csv")).unwrap();
        let dir = DatasetDir::new(tmp.path());

        let files = dir.csv_files().unwrap();
        let mut sorted = files.clone();
        sorted.sort();
        assert_eq!(sorted, vec!["sales.csv", "users.csv"]);

        let out = dir.list_datasets();
        assert!(out.starts_with("📁 **Available CSV files:**\n- "));
        assert_eq!(out.matches("sales.csv").count(), 1);
        assert_eq!(out.matches("users.csv").count(), 1);
        assert!(!out.contains("notes.txt"));
        // 保持目录遍历顺序
        let expected = format!("📁 **Available CSV files:**\n- {}", files.join("\n- "));
        assert_eq!(out, expected);
    }

    #[cfg(unix)]
    #[test]
    fn test_symlinked_csv_is_listed_and_described() {
        let source = tempfile::tempdir().unwrap();
        write(source.path(), "real.csv", "a,b\n1,2\n");
        let tmp = tempfile::tempdir().unwrap();
        std::os::unix::fs::symlink(source.path().join("real.csv"), tmp.path().join("linked.csv"))
            .unwrap();
        let dir = DatasetDir::new(tmp.path());

        assert_eq!(dir.csv_files().unwrap(), vec!["linked.csv"]);
        assert!(dir.describe_dataset("linked.csv").contains("Rows × Columns: 1 × 2"));
    }

    #[test]
    fn test_list_missing_directory_reports_error() {
        let dir = DatasetDir::new("/definitely/not/here");
        assert!(dir.list_datasets().starts_with("Error listing CSV files:"));
    }

    #[test]
    fn test_describe_wide_dataset() {
        let tmp = tempfile::tempdir().unwrap();
        let mut csv = String::from("id,a,b,c,d,e\n");
        for i in 0..7 {
            csv.push_str(&format!("{},{},x{},1.5,True,z\n", i, i * 10, i));
        }
        write(tmp.path(), "wide.csv", &csv);
        let out = DatasetDir::new(tmp.path()).describe_dataset("wide.csv");

        assert!(out.starts_with("📊 **Dataset:** `wide.csv`\nRows × Columns: 7 × 6\n\n**Preview:**\n"));
        let preview = out
            .split("**Preview:**\n")
            .nth(1)
            .unwrap()
            .split("\n\n**Column Info:**")
            .next()
            .unwrap();
        // 表头 + 前 5 行
        assert_eq!(preview.lines().count(), 6);
        assert!(preview.contains("x4"));
        assert!(!preview.contains("x5"));
        assert!(out.contains("**Column Info:**"));
        assert!(out.contains("int64"));
        assert!(out.ends_with("dtype: object"));
    }

    #[test]
    fn test_describe_narrow_dataset_has_no_column_info() {
        let tmp = tempfile::tempdir().unwrap();
        write(tmp.path(), "narrow.csv", "name,qty\napple,3\npear,5\n");
        let out = DatasetDir::new(tmp.path()).describe_dataset("narrow.csv");
        assert!(out.contains("Rows × Columns: 2 × 2"));
        assert!(!out.contains("Column Info"));
    }

    #[test]
    fn test_describe_missing_and_invalid_names() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = DatasetDir::new(tmp.path());
        assert_eq!(dir.describe_dataset("nope.csv"), "File 'nope.csv' not found.");
        assert_eq!(
            dir.describe_dataset("../secret.csv"),
            "Invalid filename '../secret.csv'."
        );
        assert_eq!(dir.describe_dataset("/etc/passwd"), "Invalid filename '/etc/passwd'.");
    }

    #[test]
    fn test_describe_malformed_csv() {
        let tmp = tempfile::tempdir().unwrap();
        write(tmp.path(), "bad.csv", "a,b\n1,2,3\n");
        let out = DatasetDir::new(tmp.path()).describe_dataset("bad.csv");
        assert!(out.starts_with("Error reading bad.csv:"));
    }

    #[tokio::test]
    async fn test_tools_through_trait() {
        let tmp = tempfile::tempdir().unwrap();
        write(tmp.path(), "t.csv", "x\n1\n");
        let dir = DatasetDir::new(tmp.path());

        let list = ListDatasetsTool::new(dir.clone());
        assert!(list.execute(Value::Null).await.unwrap().contains("t.csv"));

        let describe = DescribeDatasetTool::new(dir);
        let out = describe
            .execute(serde_json::json!({"filename": "t.csv"}))
            .await
            .unwrap();
        assert!(out.contains("Rows × Columns: 1 × 1"));
        assert!(describe.execute(serde_json::json!({})).await.is_err());
        assert_eq!(describe.parameters_schema()["required"], serde_json::json!(["filename"]));
    }
}
