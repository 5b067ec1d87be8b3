use axum::{response::IntoResponse, Json};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// 管理接口的统一响应
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub message: Option<String>,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl<T> ApiResponse<T>
where
    T: Serialize,
{
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: None,
            timestamp: chrono::Utc::now(),
        }
    }

    pub fn success_with_message(data: T, message: String) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: Some(message),
            timestamp: chrono::Utc::now(),
        }
    }
}

impl<T> IntoResponse for ApiResponse<T>
where
    T: Serialize,
{
    fn into_response(self) -> axum::response::Response {
        Json(self).into_response()
    }
}

pub fn success<T: Serialize>(data: T) -> ApiResponse<T> {
    ApiResponse::success(data)
}

/// Worker协议中表示“没有内容”的 `{}`
pub fn empty_object() -> Json<Value> {
    Json(Value::Object(Map::new()))
}

/// Worker协议响应：有值时返回其JSON，否则返回 `{}`
pub fn json_or_empty<T: Serialize>(value: Option<T>) -> Result<Json<Value>, serde_json::Error> {
    match value {
        Some(value) => Ok(Json(serde_json::to_value(value)?)),
        None => Ok(empty_object()),
    }
}
