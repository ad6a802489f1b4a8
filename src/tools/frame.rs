//! 轻量表格：CSV 读取、列类型推断与表格文本渲染
//!
//! 供 describe_dataset 使用。列类型沿用常见数据分析工具的命名（int64 / float64 / bool / object），
//! 空单元格视为缺失值并显示为 NaN。

use std::fmt;
use std::path::Path;

/// 列类型
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DType {
    Int64,
    Float64,
    Bool,
    Object,
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DType::Int64 => "int64",
            DType::Float64 => "float64",
            DType::Bool => "bool",
            DType::Object => "object",
        };
        f.write_str(s)
    }
}

/// 内存中的表格：表头 + 按行存储的原始文本
#[derive(Clone, Debug)]
pub struct DataFrame {
    columns: Vec<String>,
    rows: Vec<Vec<String>>,
    dtypes: Vec<DType>,
}

impl DataFrame {
    /// 读取 CSV 文件（首行为表头）
    pub fn from_csv_path(path: &Path) -> Result<Self, String> {
        let reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_path(path)
            .map_err(|e| e.to_string())?;
        Self::from_reader(reader)
    }

    /// 从内存中的 CSV 文本读取
    pub fn from_csv_str(data: &str) -> Result<Self, String> {
        let reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_reader(data.as_bytes());
        Self::from_reader(reader)
    }

    fn from_reader<R: std::io::Read>(mut reader: csv::Reader<R>) -> Result<Self, String> {
        let columns: Vec<String> = reader
            .headers()
            .map_err(|e| e.to_string())?
            .iter()
            .map(|h| h.trim().to_string())
            .collect();
        if columns.is_empty() || (columns.len() == 1 && columns[0].is_empty()) {
            return Err("No columns to parse from file".to_string());
        }

        let mut rows = Vec::new();
        for (i, record) in reader.records().enumerate() {
            let record = record.map_err(|e| e.to_string())?;
            if record.len() > columns.len() {
                // 行号从 1 开始并计入表头
                return Err(format!(
                    "Expected {} fields in line {}, saw {}",
                    columns.len(),
                    i + 2,
                    record.len()
                ));
            }
            let mut row: Vec<String> = record.iter().map(|v| v.trim().to_string()).collect();
            row.resize(columns.len(), String::new());
            rows.push(row);
        }

        let dtypes = (0..columns.len())
            .map(|c| infer_dtype(rows.iter().map(|r| r[c].as_str())))
            .collect();
        Ok(Self {
            columns,
            rows,
            dtypes,
        })
    }

    /// (行数, 列数)
    pub fn shape(&self) -> (usize, usize) {
        (self.rows.len(), self.columns.len())
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn dtypes(&self) -> &[DType] {
        &self.dtypes
    }

    /// 前 n 行的表格文本：首列为行号，表头与数值右对齐，列间两个空格
    pub fn head(&self, n: usize) -> String {
        let shown = &self.rows[..n.min(self.rows.len())];
        if shown.is_empty() {
            return format!(
                "Empty DataFrame\nColumns: [{}]\nIndex: []",
                self.columns.join(", ")
            );
        }

        let index: Vec<String> = (0..shown.len()).map(|i| i.to_string()).collect();
        let index_width = index.iter().map(|s| s.chars().count()).max().unwrap_or(0);

        let cells: Vec<Vec<String>> = (0..self.columns.len())
            .map(|c| format_column(self.dtypes[c], shown.iter().map(|r| r[c].as_str())))
            .collect();
        let widths: Vec<usize> = self
            .columns
            .iter()
            .zip(&cells)
            .map(|(name, col)| {
                col.iter()
                    .map(|v| v.chars().count())
                    .chain(std::iter::once(name.chars().count()))
                    .max()
                    .unwrap_or(0)
            })
            .collect();

        let mut lines = Vec::with_capacity(shown.len() + 1);
        let mut header = " ".repeat(index_width);
        for (name, w) in self.columns.iter().zip(&widths) {
            header.push_str("  ");
            header.push_str(&pad_left(name, *w));
        }
        lines.push(header);
        for (r, idx) in index.iter().enumerate() {
            let mut line = pad_right(idx, index_width);
            for (col, w) in cells.iter().zip(&widths) {
                line.push_str("  ");
                line.push_str(&pad_left(&col[r], *w));
            }
            lines.push(line);
        }
        lines.join("\n")
    }

    /// 每列类型文本：列名左对齐，类型右对齐，末行 `dtype: object`
    pub fn dtypes_summary(&self) -> String {
        let name_width = self
            .columns
            .iter()
            .map(|c| c.chars().count())
            .max()
            .unwrap_or(0);
        let type_names: Vec<String> = self.dtypes.iter().map(|d| d.to_string()).collect();
        let type_width = type_names.iter().map(|t| t.len()).max().unwrap_or(0);
        let mut lines: Vec<String> = self
            .columns
            .iter()
            .zip(&type_names)
            .map(|(c, t)| format!("{}    {}", pad_right(c, name_width), pad_left(t, type_width)))
            .collect();
        lines.push("dtype: object".to_string());
        lines.join("\n")
    }
}

fn is_missing(v: &str) -> bool {
    matches!(v, "" | "NA" | "N/A" | "NaN" | "nan" | "null" | "NULL")
}

fn parse_bool(v: &str) -> Option<bool> {
    match v {
        "True" | "TRUE" | "true" => Some(true),
        "False" | "FALSE" | "false" => Some(false),
        _ => None,
    }
}

/// 推断列类型：含缺失值的整数列按 float64 处理，全空列为 float64
fn infer_dtype<'a>(values: impl Iterator<Item = &'a str>) -> DType {
    let mut any_missing = false;
    let mut all_int = true;
    let mut all_float = true;
    let mut all_bool = true;
    let mut seen = 0usize;
    for v in values {
        if is_missing(v) {
            any_missing = true;
            continue;
        }
        seen += 1;
        all_int &= v.parse::<i64>().is_ok();
        all_float &= v.parse::<f64>().is_ok();
        all_bool &= parse_bool(v).is_some();
    }
    if seen == 0 {
        return DType::Float64;
    }
    if all_int {
        if any_missing {
            DType::Float64
        } else {
            DType::Int64
        }
    } else if all_float {
        DType::Float64
    } else if all_bool && !any_missing {
        DType::Bool
    } else {
        DType::Object
    }
}

/// 按列类型格式化单元格；浮点列统一小数位数
fn format_column<'a>(dtype: DType, values: impl Iterator<Item = &'a str>) -> Vec<String> {
    let values: Vec<&str> = values.collect();
    match dtype {
        DType::Float64 => {
            let parsed: Vec<Option<f64>> = values
                .iter()
                .map(|v| if is_missing(v) { None } else { v.parse::<f64>().ok() })
                .collect();
            let decimals = parsed
                .iter()
                .flatten()
                .map(|f| decimals_of(*f))
                .max()
                .unwrap_or(1)
                .clamp(1, 6);
            parsed
                .iter()
                .map(|f| match f {
                    Some(f) => format!("{:.*}", decimals, f),
                    None => "NaN".to_string(),
                })
                .collect()
        }
        DType::Bool => values
            .iter()
            .map(|v| match parse_bool(v) {
                Some(true) => "True".to_string(),
                Some(false) => "False".to_string(),
                None => "NaN".to_string(),
            })
            .collect(),
        DType::Int64 => values.iter().map(|v| v.to_string()).collect(),
        DType::Object => values
            .iter()
            .map(|v| {
                if v.is_empty() {
                    "NaN".to_string()
                } else {
                    v.to_string()
                }
            })
            .collect(),
    }
}

fn decimals_of(f: f64) -> usize {
    let s = format!("{}", f);
    s.split_once('.').map(|(_, frac)| frac.len()).unwrap_or(0)
}

fn pad_left(s: &str, width: usize) -> String {
    let len = s.chars().count();
    if len >= width {
        s.to_string()
    } else {
        format!("{}{}", " ".repeat(width - len), s)
    }
}

fn pad_right(s: &str, width: usize) -> String {
    let len = s.chars().count();
    if len >= width {
        s.to_string()
    } else {
        format!("{}{}", s, " ".repeat(width - len))
    }
}
