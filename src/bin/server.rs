//! Hive HTTP 服务
//!
//! 环境变量:
//! - OPENAI_API_KEY 或 DEEPSEEK_API_KEY: Oracle API Key（缺失时使用 Mock）
//! - EMAIL_API_KEY: 事务邮件 API Key
//! - WHATSAPP_ACCESS_TOKEN / WHATSAPP_PHONE_NUMBER_ID: WhatsApp Cloud API
//! - HIVE__SERVER__BIND: 监听地址（默认 0.0.0.0:8000）
//!
//! 启动: cargo run --bin hive-server --features server

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use hive::core::{create_hive_builder, ShutdownCoordinator, ShutdownManager, TrackerSnapshot};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    hive::observability::init();

    let hive = create_hive_builder(None)
        .attach_context_db()
        .await?
        .build()
        .context("Failed to build hive components")?;
    match hive.load_system_knowledge().await {
        Ok(0) => {}
        Ok(n) => tracing::info!("System knowledge ready ({} paragraphs)", n),
        Err(e) => tracing::warn!("System knowledge not loaded: {}", e),
    }
    let hive = Arc::new(hive);

    let shutdown = ShutdownManager::new();
    shutdown.install_signal_handlers();

    let bind = hive.config.server.bind.clone();
    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("Failed to bind {}", bind))?;
    tracing::info!("Hive server listening on http://{}", bind);

    let app = hive::server::router(Arc::clone(&hive));
    let token = shutdown.token();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { token.cancelled().await })
        .await?;

    let mut coordinator = ShutdownCoordinator::new().with_timeout(Duration::from_secs(10));
    if let Some(path) = &hive.config.app.state_path {
        coordinator.register(TrackerSnapshot::new(Arc::clone(&hive.tracker), path));
    }
    coordinator.run_cleanup().await;
    tracing::info!("Hive server stopped");

    Ok(())
}
