//! 可观测性：tracing 日志初始化
//!
//! 默认 info 级别，可通过 RUST_LOG 覆盖（例如 `RUST_LOG=hive=debug`）。

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

fn default_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

/// 初始化全局日志；重复调用时静默忽略
pub fn init() {
    let _ = tracing_subscriber::registry()
        .with(default_filter())
        .with(fmt::layer().with_target(true))
        .try_init();
}
