//! # Batchhost Core
//!
//! 模块宿主与Worker协调服务的公共基础：错误类型、配置、日志初始化、
//! 共享数据模型以及外部协作者（作业存储、调度队列、配置属性、安全服务）的接口定义。

pub mod config;
pub mod errors;
pub mod logging;
pub mod models;
pub mod traits;

pub use config::AppConfig;
pub use errors::*;
pub use logging::init_logging;
pub use models::{
    BusinessApplication, ExecutionGroup, ModuleAction, ModuleEvent, ModuleStatus, RangeSet,
    ResourcePermission, WorkerModuleState, WorkerModuleStatus,
};

/// 统一的Result类型
pub type HostResult<T> = std::result::Result<T, HostError>;
