//! run_code 工具：在 python 子进程中执行代码片段
//!
//! 子进程运行一段固定的引导脚本：预载 pd / plt(Agg) / np / os（未安装则跳过），
//! 从 stdin 读入代码并 exec，捕获 stdout，最后以一行带标记的 JSON 汇报结果。
//! 该工具可执行任意代码，仅在 `tools.code.allow_unsafe_exec = true` 时注册。

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::tools::schema::{args_schema, parse_args};
use crate::tools::Tool;

pub const NO_OUTPUT: &str = "(No output)";

const RESULT_MARKER: &str = "__DATATALK_RESULT__";

const HARNESS: &str = r#"
import contextlib, io, json, sys
ns = {"__name__": "__main__"}
for alias, module in (("pd", "pandas"), ("np", "numpy"), ("os", "os")):
    try:
        ns[alias] = __import__(module)
    except Exception:
        pass
try:
    import matplotlib
    matplotlib.use("Agg")
    import matplotlib.pyplot as plt
    ns["plt"] = plt
except Exception:
    pass
code = sys.stdin.read()
buf = io.StringIO()
error = None
try:
    with contextlib.redirect_stdout(buf):
        exec(compile(code, "<run_code>", "exec"), ns)
except BaseException as e:
    error = str(e) or type(e).__name__
sys.stdout.flush()
sys.__stdout__.write("\n__DATATALK_RESULT__" + json.dumps({"output": buf.getvalue(), "error": error}) + "\n")
"#;

/// 引导脚本回报的结果
#[derive(Debug, Deserialize, PartialEq)]
struct HarnessReport {
    #[serde(default)]
    output: String,
    #[serde(default)]
    error: Option<String>,
}

/// run_code 参数
#[derive(Debug, Deserialize, JsonSchema)]
struct RunCodeArgs {
    /// Python code to execute. pd, np, plt and os are preloaded; use print() to return output.
    code: String,
}

/// 代码执行工具
pub struct RunCodeTool {
    python: String,
    timeout_secs: u64,
    working_dir: Option<PathBuf>,
}

impl RunCodeTool {
    pub fn new(python: impl Into<String>, timeout_secs: u64) -> Self {
        Self {
            python: python.into(),
            timeout_secs,
            working_dir: None,
        }
    }

    /// 子进程工作目录（默认继承当前进程）
    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// 执行代码片段；返回给模型的文本（输出、`(No output)` 或 `Error: ...`）
    pub async fn run(&self, code: &str) -> Result<String, String> {
        let mut cmd = Command::new(&self.python);
        cmd.args(["-c", HARNESS])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }

        let mut child = cmd
            .spawn()
            .map_err(|e| format!("failed to start {}: {}", self.python, e))?;
        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(code.as_bytes())
                .await
                .map_err(|e| format!("failed to send code: {}", e))?;
        }

        let output = tokio::time::timeout(
            Duration::from_secs(self.timeout_secs),
            child.wait_with_output(),
        )
        .await
        .map_err(|_| format!("timed out after {}s", self.timeout_secs))?
        .map_err(|e| format!("Execution failed: {}", e))?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        match parse_report(&stdout) {
            Some(report) => Ok(render_report(report)),
            None => {
                let stderr = String::from_utf8_lossy(&output.stderr);
                Err(format!(
                    "interpreter exited with {} without a result\nstderr: {}",
                    output.status,
                    stderr.trim()
                ))
            }
        }
    }
}

/// 取最后一个标记行中的 JSON
fn parse_report(stdout: &str) -> Option<HarnessReport> {
    let (_, tail) = stdout.rsplit_once(RESULT_MARKER)?;
    let line = tail.lines().next().unwrap_or("");
    serde_json::from_str(line).ok()
}

fn render_report(report: HarnessReport) -> String {
    if let Some(error) = report.error {
        return format!("Error: {}", error);
    }
    let output = report.output.trim();
    if output.is_empty() {
        NO_OUTPUT.to_string()
    } else {
        output.to_string()
    }
}

#[async_trait]
impl Tool for RunCodeTool {
    fn name(&self) -> &str {
        "run_code"
    }

    fn description(&self) -> &str {
        "Execute a Python snippet for analysis or visualization. pandas (pd), numpy (np), matplotlib.pyplot (plt) and os are preloaded; printed output is returned."
    }

    fn parameters_schema(&self) -> Value {
        args_schema::<RunCodeArgs>()
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        let args: RunCodeArgs = parse_args(args)?;
        tracing::info!(bytes = args.code.len(), "run_code execute");
        self.run(&args.code).await
    }
}
