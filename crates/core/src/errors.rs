use thiserror::Error;

/// 模块宿主错误类型定义
#[derive(Debug, Error)]
pub enum HostError {
    #[error("模块未找到: {name}")]
    ModuleNotFound { name: String },

    #[error("已加载同名模块: {name}")]
    DuplicateModule { name: String },

    #[error("模块未启动: {name}")]
    ModuleNotStarted { name: String },

    #[error("业务应用未找到: {name}")]
    BusinessApplicationNotFound { name: String },

    #[error("Worker未找到: {id}")]
    WorkerNotFound { id: String },

    #[error("执行组未找到: {id}")]
    GroupNotFound { id: String },

    #[error("无效的插件清单: {0}")]
    InvalidManifest(String),

    #[error("无效的请求范围: {0}")]
    InvalidRange(String),

    #[error("无效的用户组定义: {0}")]
    InvalidUserGroups(String),

    #[error("插件执行错误: {0}")]
    Plugin(String),

    #[error("存储错误: {0}")]
    Store(String),

    #[error("配置错误: {0}")]
    Configuration(String),

    #[error("安全服务错误: {0}")]
    Security(String),

    #[error("序列化错误: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO错误: {0}")]
    Io(#[from] std::io::Error),

    #[error("模块控制队列已关闭")]
    ControlQueueClosed,

    #[error("内部错误: {0}")]
    Internal(String),
}

impl HostError {
    /// 是否为资源不存在类错误
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            HostError::ModuleNotFound { .. }
                | HostError::BusinessApplicationNotFound { .. }
                | HostError::WorkerNotFound { .. }
                | HostError::GroupNotFound { .. }
        )
    }
}
