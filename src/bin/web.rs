//! datatalk Web UI
//!
//! 启动: cargo run --bin datatalk-web --features web
//! 浏览器访问 http://127.0.0.1:7860

#![cfg(feature = "web")]

use std::convert::Infallible;
use std::sync::Arc;

use anyhow::Context;
use axum::{
    body::Body,
    extract::{Query, State},
    http::{header, StatusCode},
    response::{Html, Response},
    routing::{get, post},
    Json, Router,
};
use bytes::Bytes;
use futures_util::stream::{self, TryStreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use datatalk::agent::{create_agent_components, process_message, process_message_stream, AgentComponents};
use datatalk::config::load_config;
use datatalk::core::{AgentError, StopReason};
use datatalk::dispatch::DispatchEvent;
use datatalk::memory::{validate_session_id, SessionManager, SessionStore};
use datatalk::observability;
use datatalk::presentation::{display_history, render_turn, HistoryPair};

struct AppState {
    components: AgentComponents,
    sessions: SessionManager,
}

#[derive(Debug, Deserialize)]
struct ChatRequest {
    message: String,
    session_id: Option<String>,
}

#[derive(Debug, Serialize)]
struct ChatResponse {
    reply: String,
    session_id: String,
    history: Vec<HistoryPair>,
    stop: StopReason,
}

#[derive(Debug, Deserialize)]
struct HistoryQuery {
    session_id: Option<String>,
}

#[derive(Debug, Serialize)]
struct HistoryResponse {
    session_id: String,
    messages: Vec<HistoryPair>,
}

#[derive(Debug, Deserialize)]
struct ClearSessionRequest {
    session_id: Option<String>,
}

#[derive(Debug, Serialize)]
struct ToolInfo {
    name: String,
    description: String,
}

#[derive(Debug, Serialize)]
struct DatasetsResponse {
    files: Vec<String>,
}

type ApiError = (StatusCode, String);

fn status_for(err: &AgentError) -> StatusCode {
    match err {
        AgentError::Llm(_) => StatusCode::BAD_GATEWAY,
        AgentError::TranscriptViolation(_) => StatusCode::CONFLICT,
        AgentError::PathEscape(_) => StatusCode::BAD_REQUEST,
        AgentError::Cancelled => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn api_error(err: AgentError) -> ApiError {
    (status_for(&err), format!("❌ {}", err))
}

/// 取请求中的 session_id（校验字符集），缺省时生成新的
fn resolve_session_id(raw: Option<String>) -> Result<String, ApiError> {
    match raw.filter(|s| !s.is_empty()) {
        Some(id) => {
            validate_session_id(&id).map_err(api_error)?;
            Ok(id)
        }
        None => Ok(uuid::Uuid::new_v4().to_string()),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    observability::init();

    let cfg = load_config(None).context("Failed to load config")?;
    let components = create_agent_components(&cfg).context("Failed to create agent")?;
    let store = cfg.app.sessions_dir.as_ref().map(SessionStore::new);
    let state = Arc::new(AppState {
        components,
        sessions: SessionManager::new(store, cfg.app.max_sessions),
    });

    let app = Router::new()
        .route("/", get(index))
        .route("/api/chat", post(api_chat))
        .route("/api/chat/stream", post(api_chat_stream))
        .route("/api/history", get(api_history))
        .route("/api/session/clear", post(api_session_clear))
        .route("/api/datasets", get(api_datasets))
        .route("/api/tools", get(api_tools_list))
        .route("/api/health", get(|| async { "OK" }))
        .with_state(state);

    let port = std::env::var("DATATALK_WEB_PORT")
        .ok()
        .and_then(|s| s.parse::<u16>().ok())
        .unwrap_or(cfg.web.port);
    let addr = format!("{}:{}", cfg.web.host, port);
    tracing::info!("datatalk Web UI: http://{}", addr);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    axum::serve(listener, app).await?;

    Ok(())
}

async fn index() -> Html<&'static str> {
    Html(include_str!("../../static/index.html"))
}

/// POST /api/chat：跑完一轮后返回渲染结果与完整界面历史
async fn api_chat(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, ApiError> {
    let message = req.message.trim();
    if message.is_empty() {
        return Err((StatusCode::BAD_REQUEST, "message is required".to_string()));
    }
    let session_id = resolve_session_id(req.session_id)?;

    let handle = state.sessions.get_or_create(&session_id).await;
    let mut session = handle.lock().await;
    let result = process_message(&state.components, &mut session, message, CancellationToken::new()).await;
    // 失败时也保存：User 消息保留在历史中
    state.sessions.persist(&session);
    let outcome = result.map_err(api_error)?;

    Ok(Json(ChatResponse {
        reply: render_turn(&outcome.new_messages),
        session_id,
        history: display_history(&session.conversation),
        stop: outcome.stop,
    }))
}

/// POST /api/chat/stream：NDJSON，首行 session_id，之后每行一个 DispatchEvent
///
/// 客户端断开时取消本轮（下一次调用模型前生效）。
async fn api_chat_stream(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ChatRequest>,
) -> Result<Response, ApiError> {
    let message = req.message.trim().to_string();
    if message.is_empty() {
        return Err((StatusCode::BAD_REQUEST, "message is required".to_string()));
    }
    let session_id = resolve_session_id(req.session_id)?;

    let (event_tx, event_rx) = mpsc::unbounded_channel::<DispatchEvent>();
    let (done_tx, done_rx) = tokio::sync::oneshot::channel::<()>();
    let cancel_token = CancellationToken::new();

    let state_spawn = Arc::clone(&state);
    let session_id_spawn = session_id.clone();
    let token_spawn = cancel_token.clone();
    tokio::spawn(async move {
        let handle = state_spawn.sessions.get_or_create(&session_id_spawn).await;
        let mut session = handle.lock().await;
        let result = process_message_stream(
            &state_spawn.components,
            &mut session,
            &message,
            event_tx,
            token_spawn,
        )
        .await;
        if let Err(e) = result {
            tracing::warn!(session = %session_id_spawn, "stream turn failed: {}", e);
        }
        // 无论流是否被客户端断开，都持久化当前会话
        state_spawn.sessions.persist(&session);
        let _ = done_tx.send(());
    });

    let first_line = format!(
        "{}\n",
        serde_json::json!({
            "type": "session_id",
            "session_id": session_id
        })
    );

    let stream = stream::try_unfold(
        (
            done_rx,
            event_rx,
            Some(first_line),
            cancel_token.drop_guard(),
        ),
        |(done_rx, mut event_rx, first_line_opt, guard)| async move {
            if let Some(line) = first_line_opt {
                return Ok::<_, Infallible>(Some((Bytes::from(line), (done_rx, event_rx, None, guard))));
            }
            match event_rx.recv().await {
                Some(ev) => {
                    let line = match serde_json::to_string(&ev) {
                        Ok(json) => format!("{}\n", json),
                        Err(e) => format!(
                            "{}\n",
                            serde_json::json!({"type": "error", "text": e.to_string()})
                        ),
                    };
                    Ok::<_, Infallible>(Some((Bytes::from(line), (done_rx, event_rx, None, guard))))
                }
                None => {
                    let _ = done_rx.await;
                    // 本轮已结束，解除 guard 避免多余的取消
                    guard.disarm();
                    Ok::<_, Infallible>(None)
                }
            }
        },
    );

    type BoxErr = Box<dyn std::error::Error + Send + Sync>;
    let stream = stream.map_err(|e: Infallible| Box::new(e) as BoxErr);

    let mut res = Response::new(Body::from_stream(stream));
    res.headers_mut().insert(
        header::CONTENT_TYPE,
        header::HeaderValue::from_static("application/x-ndjson; charset=utf-8"),
    );
    Ok(res)
}

/// GET /api/history?session_id=
async fn api_history(
    State(state): State<Arc<AppState>>,
    Query(q): Query<HistoryQuery>,
) -> Result<Json<HistoryResponse>, ApiError> {
    let session_id = match q.session_id.filter(|s| !s.is_empty()) {
        Some(s) => s,
        None => return Err((StatusCode::BAD_REQUEST, "session_id is required".to_string())),
    };
    validate_session_id(&session_id).map_err(api_error)?;
    let messages = state
        .sessions
        .find(&session_id)
        .await
        .map(|s| display_history(&s.conversation))
        .unwrap_or_default();
    Ok(Json(HistoryResponse {
        session_id,
        messages,
    }))
}

/// POST /api/session/clear：清空内存与磁盘中的会话
async fn api_session_clear(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ClearSessionRequest>,
) -> Result<StatusCode, ApiError> {
    let session_id = match req.session_id.filter(|s| !s.is_empty()) {
        Some(s) => s,
        None => return Ok(StatusCode::OK),
    };
    validate_session_id(&session_id).map_err(api_error)?;
    state.sessions.clear(&session_id).await;
    Ok(StatusCode::OK)
}

/// GET /api/datasets：数据目录下的 CSV 文件
async fn api_datasets(State(state): State<Arc<AppState>>) -> Result<Json<DatasetsResponse>, ApiError> {
    let files = state
        .components
        .datasets
        .csv_files()
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("Error listing CSV files: {}", e)))?;
    Ok(Json(DatasetsResponse { files }))
}

/// GET /api/tools：已注册的工具
async fn api_tools_list(State(state): State<Arc<AppState>>) -> Json<Vec<ToolInfo>> {
    let list = state
        .components
        .executor
        .tool_descriptions()
        .into_iter()
        .map(|(name, description)| ToolInfo { name, description })
        .collect();
    Json(list)
}

#[cfg(test)]
mod tests {
    use super::*;
    use datatalk::llm::LlmError;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            status_for(&AgentError::Llm(LlmError::Server("500".to_string()))),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            status_for(&AgentError::PathEscape("../x".to_string())),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn test_resolve_session_id() {
        assert_eq!(resolve_session_id(Some("abc-1".to_string())).unwrap(), "abc-1");
        assert!(resolve_session_id(Some("../etc".to_string())).is_err());
        let generated = resolve_session_id(None).unwrap();
        assert!(validate_session_id(&generated).is_ok());
    }
}
