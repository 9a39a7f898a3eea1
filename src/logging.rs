//! tracing 日志初始化
//!
//! 由宿主程序在启动时调用一次；`RUST_LOG` 可覆盖默认级别。

use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

/// 安装全局 fmt subscriber，重复调用时静默忽略
pub fn init_logging() {
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}
