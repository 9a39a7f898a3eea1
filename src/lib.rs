// Slacko client core library entry
// 服务层对外只暴露 AppContext；各模块也可单独使用（测试中直接构造服务）。

pub mod api;
pub mod app_config;
pub mod context;
pub mod local_storage;
pub mod logging;
pub mod models;
pub mod services;

pub use context::AppContext;
pub use models::{AppError, AppErrorType};
