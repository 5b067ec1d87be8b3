//! # Batchhost Coordinator
//!
//! 主节点与Worker之间的协调：Worker代理、执行组分发、结果回收、
//! 会话消息路由、模块状态推送、安全委托以及失联Worker检测。

pub mod coordinator;
pub mod failure_detector;
pub mod security;
pub mod session;
pub mod worker;

pub use coordinator::{CoordinatorServices, WorkerCoordinator};
pub use failure_detector::WorkerFailureDetector;
pub use security::SecurityProxy;
pub use session::WorkerSession;
pub use worker::Worker;

/// 当前时间（毫秒）
pub(crate) fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
