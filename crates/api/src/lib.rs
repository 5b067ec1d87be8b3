//! # Batchhost API
//!
//! 基于Axum的HTTP接口：Worker协议、Worker持久会话（WebSocket）、
//! 模块构件下载以及模块管理。
//!
//! ## API 端点
//!
//! ### Worker协议
//! - `POST /workers/{workerId}/{startTime}/groups/next?moduleName=a,b` - 轮询下一个执行组
//! - `GET /workers/{workerId}/jobs/{jobId}/groups/{groupId}` - 执行组描述
//! - `POST /workers/{workerId}/jobs/{jobId}/groups/{groupId}/results` - 提交执行组结果
//! - `POST /workers/{workerId}/jobs/{jobId}/groups/{groupId}/error` - 提交执行组错误
//! - `GET .../requests/{sequence}/inputData`、`POST .../requests/{sequence}/resultData` - 不透明数据
//! - `GET /workers/{workerId}/{startTime}/message` - 持久会话
//!
//! ### 模块
//! - `GET /modules/{moduleName}/{moduleTime}/urls` - 构件列表
//! - `GET /modules/{moduleName}/{moduleTime}/artifacts/{index}` - 下载构件
//! - `GET /modules/{moduleName}/{moduleTime}/config` - 模块配置属性
//!
//! ### 管理
//! - `GET /api/modules`、`GET /api/modules/{name}`
//! - `POST /api/modules/{name}/{start|stop|restart|enable|disable}`
//! - `POST /api/modules/refresh`
//! - `GET /api/workers`
//! - `GET /health`
//!
//! ## 响应格式
//!
//! Worker协议直接返回协议JSON，没有内容时为 `{}`。管理接口返回：
//!
//! ```json
//! {"success": true, "data": {...}, "message": null, "timestamp": "..."}
//! ```
//!
//! 错误响应：
//!
//! ```json
//! {"error": {"message": "...", "type": "MODULE_NOT_FOUND", "code": 404, "timestamp": "..."}}
//! ```

pub mod error;
pub mod handlers;
pub mod middleware;
pub mod response;
pub mod routes;

pub use error::{ApiError, ApiResult};
pub use routes::{create_app, create_routes, AppState};
