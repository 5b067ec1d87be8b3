use axum::{
    extract::DefaultBodyLimit,
    middleware::from_fn,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use std::time::Duration;
use tower_http::timeout::TimeoutLayer;

use batchhost_coordinator::WorkerCoordinator;
use batchhost_core::config::ServerConfig;
use batchhost_module::ModuleRegistry;

use crate::handlers::{
    health::health_check,
    modules::{
        get_module, list_modules, module_action, module_artifact, module_artifact_paths,
        module_config, refresh_modules,
    },
    session::worker_session,
    workers::{
        group_specification, list_workers, next_group, request_input_data, submit_error,
        submit_result_data, submit_results,
    },
};
use crate::middleware::{cors_layer, request_logging, trace_layer};

/// API应用状态
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<ModuleRegistry>,
    pub coordinator: Arc<WorkerCoordinator>,
}

impl AppState {
    pub fn new(coordinator: Arc<WorkerCoordinator>) -> Self {
        Self {
            registry: coordinator.registry().clone(),
            coordinator,
        }
    }
}

/// 创建API路由
pub fn create_routes(state: AppState) -> Router {
    Router::new()
        // 健康检查
        .route("/health", get(health_check))
        // Worker协议
        .route("/workers/{worker_id}/{start_time}/groups/next", post(next_group))
        .route("/workers/{worker_id}/{start_time}/message", get(worker_session))
        .route(
            "/workers/{worker_id}/jobs/{job_id}/groups/{group_id}",
            get(group_specification),
        )
        .route(
            "/workers/{worker_id}/jobs/{job_id}/groups/{group_id}/results",
            post(submit_results),
        )
        .route(
            "/workers/{worker_id}/jobs/{job_id}/groups/{group_id}/error",
            post(submit_error),
        )
        .route(
            "/workers/{worker_id}/jobs/{job_id}/groups/{group_id}/requests/{sequence_number}/inputData",
            get(request_input_data),
        )
        .route(
            "/workers/{worker_id}/jobs/{job_id}/groups/{group_id}/requests/{sequence_number}/resultData",
            post(submit_result_data),
        )
        // 模块构件和配置
        .route("/modules/{module_name}/{module_time}/urls", get(module_artifact_paths))
        .route(
            "/modules/{module_name}/{module_time}/artifacts/{index}",
            get(module_artifact),
        )
        .route("/modules/{module_name}/{module_time}/config", get(module_config))
        // 管理API
        .route("/api/modules", get(list_modules))
        .route("/api/modules/refresh", post(refresh_modules))
        .route("/api/modules/{name}", get(get_module))
        .route("/api/modules/{name}/{action}", post(module_action))
        .route("/api/workers", get(list_workers))
        .with_state(state)
}

/// 路由加上服务器配置的中间件
pub fn create_app(state: AppState, config: &ServerConfig) -> Router {
    let router = create_routes(state)
        .layer(from_fn(request_logging))
        .layer(DefaultBodyLimit::max(config.max_request_size_mb * 1024 * 1024))
        .layer(TimeoutLayer::new(Duration::from_secs(config.request_timeout_seconds)))
        .layer(trace_layer());
    if config.cors_enabled {
        router.layer(cors_layer())
    } else {
        router
    }
}
