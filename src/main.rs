//! Hive - 交互式命令行入口
//!
//! 每行输入作为一次请求交给编排器；Ctrl+C 或 EOF 退出，退出前保存 Agent 表现快照。
//! 用户身份取自环境变量 HIVE_USER（默认 local@hive）。

use anyhow::Context;
use hive::core::{create_hive_builder, RunRequest, ShutdownManager};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

const DEFAULT_USER: &str = "local@hive";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    hive::observability::init();

    let hive = create_hive_builder(None)
        .attach_context_db()
        .await?
        .build()
        .context("Failed to build hive components")?;
    if let Err(e) = hive.load_system_knowledge().await {
        tracing::warn!("System knowledge not loaded: {}", e);
    }

    let user = std::env::var("HIVE_USER").unwrap_or_else(|_| DEFAULT_USER.to_string());
    let shutdown = ShutdownManager::new();
    shutdown.install_signal_handlers();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();
    let name = hive.config.app.name.as_deref().unwrap_or("hive");
    println!("{} ready (user: {}). Type a request, or 'exit' to quit.", name, user);

    loop {
        stdout.write_all(b"> ").await?;
        stdout.flush().await?;

        let line = tokio::select! {
            _ = shutdown.wait_for_shutdown() => break,
            line = lines.next_line() => line?,
        };
        let Some(line) = line else { break };
        let prompt = line.trim();
        if prompt.is_empty() {
            continue;
        }
        if matches!(prompt, "exit" | "quit") {
            break;
        }

        match hive.orchestrator.handle(RunRequest::new(prompt, user.as_str())).await {
            Ok(response) => {
                println!("{}", response.final_output);
                if let Some(file_name) = &response.file_name {
                    println!("[file: {}]", file_name);
                }
                tracing::debug!(
                    phase = %response.phase,
                    seconds = response.execution_time,
                    "request finished"
                );
            }
            Err(e) => {
                tracing::error!("Request failed: {}", e);
                println!("{}", e.user_message());
            }
        }
    }

    hive.save_state().context("Failed to save performance snapshot")?;
    Ok(())
}
