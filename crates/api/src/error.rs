use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use batchhost_core::HostError;
use serde_json::json;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("模块宿主错误: {0}")]
    Host(#[from] HostError),

    #[error("序列化错误: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("内部服务器错误: {0}")]
    Internal(String),

    #[error("未找到资源")]
    NotFound,

    #[error("请求冲突: {0}")]
    Conflict(String),

    #[error("请求参数错误: {0}")]
    BadRequest(String),
}

impl ApiError {
    fn status_and_type(&self) -> (StatusCode, &'static str) {
        match self {
            ApiError::Host(HostError::ModuleNotFound { .. }) => (StatusCode::NOT_FOUND, "MODULE_NOT_FOUND"),
            ApiError::Host(HostError::BusinessApplicationNotFound { .. }) => {
                (StatusCode::NOT_FOUND, "BUSINESS_APPLICATION_NOT_FOUND")
            }
            ApiError::Host(HostError::WorkerNotFound { .. }) => (StatusCode::NOT_FOUND, "WORKER_NOT_FOUND"),
            ApiError::Host(HostError::GroupNotFound { .. }) => (StatusCode::NOT_FOUND, "GROUP_NOT_FOUND"),
            ApiError::Host(HostError::DuplicateModule { .. }) => (StatusCode::CONFLICT, "DUPLICATE_MODULE"),
            ApiError::Host(HostError::ModuleNotStarted { .. }) => (StatusCode::CONFLICT, "MODULE_NOT_STARTED"),
            ApiError::Host(
                HostError::InvalidRange(_)
                | HostError::InvalidManifest(_)
                | HostError::InvalidUserGroups(_)
                | HostError::Serialization(_),
            ) => (StatusCode::BAD_REQUEST, "BAD_REQUEST"),
            ApiError::Host(_) | ApiError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
            ApiError::Serialization(_) => (StatusCode::BAD_REQUEST, "SERIALIZATION_ERROR"),
            ApiError::NotFound => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            ApiError::Conflict(_) => (StatusCode::CONFLICT, "CONFLICT"),
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_type) = self.status_and_type();
        if status.is_server_error() {
            tracing::error!("请求处理失败: {}", self);
        }

        let body = Json(json!({
            "error": {
                "message": self.to_string(),
                "type": error_type,
                "code": status.as_u16(),
                "timestamp": chrono::Utc::now().to_rfc3339(),
            }
        }));

        (status, body).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
