//! Headless Agent 运行时
//!
//! 供终端 REPL 与 HTTP 前端共用的无界面逻辑：
//! create_agent_components 从配置构建模型客户端与工具执行器（启动时缺少 API Key 直接失败），
//! process_message / process_message_stream 对单个会话跑一轮调度循环，并按 max_turns 裁剪历史。

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::config::AppConfig;
use crate::core::AgentError;
use crate::dispatch::{run_turn, DispatchEvent, TurnContext, TurnOutcome};
use crate::llm::{LlmClient, OpenAiClient};
use crate::memory::Session;
use crate::tools::{
    DatasetDir, DescribeDatasetTool, ListDatasetsTool, RunCodeTool, ToolExecutor, ToolRegistry,
};

/// 预构建的 Agent 组件：模型客户端与工具执行器只读共享，可服务多个会话
pub struct AgentComponents {
    pub llm: Arc<dyn LlmClient>,
    pub executor: ToolExecutor,
    pub datasets: DatasetDir,
    pub system_prompt: String,
    pub max_round_trips: usize,
    /// 每个会话保留的最近轮数，0 表示不限制
    pub max_turns: usize,
}

impl AgentComponents {
    /// 用给定的模型客户端组装（测试中传入 ScriptedLlmClient）
    pub fn with_llm(cfg: &AppConfig, llm: Arc<dyn LlmClient>) -> Self {
        let datasets = dataset_dir(cfg);
        Self {
            llm,
            executor: ToolExecutor::new(build_registry(cfg), cfg.tools.tool_timeout_secs),
            datasets,
            system_prompt: cfg.system_prompt(),
            max_round_trips: cfg.agent.max_round_trips,
            max_turns: cfg.app.max_turns,
        }
    }

    fn turn_context(&self, cancel_token: CancellationToken) -> TurnContext<'_> {
        TurnContext::new(self.llm.as_ref(), &self.executor, &self.system_prompt)
            .with_max_round_trips(self.max_round_trips)
            .with_cancel_token(cancel_token)
    }
}

fn dataset_dir(cfg: &AppConfig) -> DatasetDir {
    DatasetDir::new(&cfg.app.data_dir)
        .with_preview_rows(cfg.tools.preview_rows)
        .with_column_info_threshold(cfg.tools.column_info_threshold)
}

/// 按配置注册工具：list_datasets、describe_dataset；仅在显式开启时注册 run_code
pub fn build_registry(cfg: &AppConfig) -> ToolRegistry {
    let datasets = dataset_dir(cfg);
    let mut tools = ToolRegistry::new();
    tools.register(ListDatasetsTool::new(datasets.clone()));
    tools.register(DescribeDatasetTool::new(datasets));

    let code = &cfg.tools.code;
    if code.allow_unsafe_exec {
        tracing::warn!(
            python = %code.python,
            "run_code enabled: model-written code runs unsandboxed on this machine"
        );
        tools.register(RunCodeTool::new(code.python.clone(), code.timeout_secs));
    } else {
        tracing::info!("run_code disabled (tools.code.allow_unsafe_exec = false)");
    }
    tools
}

/// 创建 Agent 组件：校验 API Key、创建数据目录、构建 OpenAI 兼容客户端与工具
pub fn create_agent_components(cfg: &AppConfig) -> Result<AgentComponents, AgentError> {
    let api_key = cfg.require_api_key()?;
    std::fs::create_dir_all(&cfg.app.data_dir).map_err(|e| {
        AgentError::ConfigError(format!(
            "cannot create data directory {}: {}",
            cfg.app.data_dir.display(),
            e
        ))
    })?;

    let llm = OpenAiClient::new(
        cfg.llm.base_url.as_deref(),
        &cfg.llm.model,
        &api_key,
        cfg.llm.temperature,
        cfg.llm.request_timeout_secs,
    );
    tracing::info!(model = %cfg.llm.model, data_dir = %cfg.app.data_dir.display(), "agent ready");
    Ok(AgentComponents::with_llm(cfg, Arc::new(llm)))
}

/// 处理单条用户消息：跑一轮调度循环（无事件流），返回本轮结果
pub async fn process_message(
    components: &AgentComponents,
    session: &mut Session,
    user_input: &str,
    cancel_token: CancellationToken,
) -> Result<TurnOutcome, AgentError> {
    let ctx = components.turn_context(cancel_token);
    let result = run_turn(&ctx, &mut session.conversation, user_input).await;
    finish_turn(components, session, result)
}

/// 流式处理单条用户消息：通过 event_tx 推送 RoundTrip / ToolCall / ToolResult / Done 等事件
pub async fn process_message_stream(
    components: &AgentComponents,
    session: &mut Session,
    user_input: &str,
    event_tx: mpsc::UnboundedSender<DispatchEvent>,
    cancel_token: CancellationToken,
) -> Result<TurnOutcome, AgentError> {
    let ctx = components
        .turn_context(cancel_token)
        .with_event_tx(&event_tx);
    let result = run_turn(&ctx, &mut session.conversation, user_input).await;
    finish_turn(components, session, result)
}

fn finish_turn(
    components: &AgentComponents,
    session: &mut Session,
    result: Result<TurnOutcome, AgentError>,
) -> Result<TurnOutcome, AgentError> {
    session.touch();
    let pruned = session.conversation.prune_turns(components.max_turns);
    if pruned > 0 {
        tracing::debug!(session = %session.id, pruned, "pruned old turns");
    }
    result
}
