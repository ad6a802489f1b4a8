//! datatalk - 终端对话入口
//!
//! 初始化日志与配置，构建 Agent 组件，然后逐行读取用户输入跑调度循环。
//! `/clear` 清空会话，`/datasets` 列出数据集，`/quit` 退出；Ctrl+C 取消正在进行的一轮，空闲时退出。

use std::sync::{Arc, Mutex};

use anyhow::Context;
use datatalk::{
    agent::create_agent_components,
    config::load_config,
    memory::{validate_session_id, SessionManager, SessionStore},
    observability,
    presentation::interact,
};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio_util::sync::CancellationToken;

const DEFAULT_SESSION: &str = "cli";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 日志：默认 info，可通过 RUST_LOG 覆盖
    observability::init();

    let cfg = load_config(None).context("Failed to load config")?;
    let components = create_agent_components(&cfg).context("Failed to create agent")?;

    // 可选参数：会话 id（用于恢复磁盘上的历史）
    let session_id = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_SESSION.to_string());
    validate_session_id(&session_id).context("Invalid session id")?;

    let store = cfg.app.sessions_dir.as_ref().map(SessionStore::new);
    let sessions = Arc::new(SessionManager::new(store, cfg.app.max_sessions));
    let mut session = sessions.get_or_create(&session_id).await;

    let mut stdout = tokio::io::stdout();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    stdout
        .write_all(b"datatalk ready. Commands: /datasets, /clear, /quit\n")
        .await?;

    // 常驻的 Ctrl+C 监听：有轮次在跑时取消该轮，空闲时退出
    let interrupts = Arc::new(Interrupts::default());
    {
        let interrupts = Arc::clone(&interrupts);
        tokio::spawn(async move {
            while tokio::signal::ctrl_c().await.is_ok() {
                if interrupts.interrupt() {
                    break;
                }
            }
        });
    }

    loop {
        stdout.write_all(b"\n> ").await?;
        stdout.flush().await?;
        let next = tokio::select! {
            line = lines.next_line() => line?,
            _ = interrupts.shutdown.cancelled() => None,
        };
        let Some(line) = next else {
            break;
        };
        let input = line.trim();
        match input {
            "" => continue,
            "/quit" | "/exit" => break,
            "/clear" => {
                sessions.clear(&session_id).await;
                session = sessions.get_or_create(&session_id).await;
                stdout.write_all(b"History cleared.\n").await?;
                continue;
            }
            "/datasets" => {
                let listing = components.datasets.list_datasets();
                stdout.write_all(format!("{}\n", listing).as_bytes()).await?;
                continue;
            }
            _ => {}
        }

        let cancel_token = CancellationToken::new();
        interrupts.begin_turn(cancel_token.clone());

        let mut guard = session.lock().await;
        let result = interact(&components, &mut guard, input, cancel_token).await;
        interrupts.end_turn();
        sessions.persist(&guard);
        drop(guard);

        match result {
            Ok((display, _)) => {
                stdout.write_all(format!("\n{}\n", display).as_bytes()).await?;
            }
            Err(e) => {
                stdout.write_all(format!("\n❌ {}\n", e).as_bytes()).await?;
            }
        }
    }

    Ok(())
}

/// Ctrl+C 的去向：正在运行的轮次，或整个 REPL
#[derive(Default)]
struct Interrupts {
    running: Mutex<Option<CancellationToken>>,
    shutdown: CancellationToken,
}

impl Interrupts {
    fn begin_turn(&self, token: CancellationToken) {
        if let Ok(mut slot) = self.running.lock() {
            *slot = Some(token);
        }
    }

    fn end_turn(&self) {
        if let Ok(mut slot) = self.running.lock() {
            *slot = None;
        }
    }

    /// 处理一次 Ctrl+C；返回 true 表示 REPL 应退出
    fn interrupt(&self) -> bool {
        let turn = self.running.lock().ok().and_then(|slot| slot.clone());
        match turn {
            Some(token) => {
                token.cancel();
                false
            }
            None => {
                self.shutdown.cancel();
                true
            }
        }
    }
}
