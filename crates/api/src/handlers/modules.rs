use axum::{
    extract::{Path, Query, State},
    http::header,
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

use batchhost_core::models::ModuleInfo;
use batchhost_core::HostError;
use batchhost_module::Module;

use crate::{
    error::{ApiError, ApiResult},
    response::{success, ApiResponse},
    routes::AppState,
};

/// 模块配置查询参数
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleConfigParams {
    pub environment_name: Option<String>,
    pub component_name: Option<String>,
}

/// 以指定启动时间运行中的模块
async fn started_module(state: &AppState, module_name: &str, module_time: i64) -> ApiResult<Arc<Module>> {
    state
        .registry
        .get_module(module_name)
        .await
        .filter(|module| module.is_started() && module.started_time() == module_time)
        .ok_or(ApiError::NotFound)
}

pub async fn module_artifact_paths(
    State(state): State<AppState>,
    Path((module_name, module_time)): Path<(String, i64)>,
) -> ApiResult<Json<Value>> {
    let module = started_module(&state, &module_name, module_time).await?;
    Ok(Json(json!({ "artifactPaths": module.code_unit().artifacts() })))
}

pub async fn module_artifact(
    State(state): State<AppState>,
    Path((module_name, module_time, index)): Path<(String, i64, usize)>,
) -> ApiResult<Response> {
    let module = started_module(&state, &module_name, module_time).await?;
    let code_unit = module.code_unit();
    let path = code_unit
        .artifacts()
        .into_iter()
        .nth(index)
        .ok_or(ApiError::NotFound)?;
    let data = code_unit.read_artifact(&path)?;
    Ok((
        [(header::CONTENT_TYPE, "application/octet-stream")],
        data,
    )
        .into_response())
}

pub async fn module_config(
    State(state): State<AppState>,
    Path((module_name, _module_time)): Path<(String, i64)>,
    Query(params): Query<ModuleConfigParams>,
) -> ApiResult<Json<Value>> {
    state.registry.require_module(&module_name).await?;
    let properties = state
        .coordinator
        .module_config(
            &module_name,
            params.environment_name.as_deref(),
            params.component_name.as_deref(),
        )
        .await?;
    Ok(Json(serde_json::to_value(properties)?))
}

pub async fn list_modules(State(state): State<AppState>) -> ApiResult<ApiResponse<Vec<ModuleInfo>>> {
    Ok(success(state.registry.module_infos().await))
}

pub async fn get_module(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<ApiResponse<ModuleInfo>> {
    let module = state.registry.require_module(&name).await?;
    Ok(success(module.info()))
}

/// 模块生命周期操作：start、stop、restart、enable、disable
pub async fn module_action(
    State(state): State<AppState>,
    Path((name, action)): Path<(String, String)>,
) -> ApiResult<impl IntoResponse> {
    let registry = &state.registry;
    match action.as_str() {
        "start" => registry.start_module(&name).await?,
        "stop" => registry.stop_module(&name).await?,
        "restart" => registry.restart_module(&name).await?,
        "enable" => registry.enable_module(&name).await?,
        "disable" => registry.disable_module(&name).await?,
        other => return Err(ApiError::BadRequest(format!("未知的模块操作: {other}"))),
    }
    let module = registry
        .get_module(&name)
        .await
        .ok_or(HostError::ModuleNotFound { name: name.clone() })?;
    Ok(ApiResponse::success_with_message(
        module.info(),
        format!("已请求模块操作 {action}"),
    ))
}

pub async fn refresh_modules(State(state): State<AppState>) -> ApiResult<ApiResponse<Vec<ModuleInfo>>> {
    state.registry.refresh_modules().await;
    Ok(success(state.registry.module_infos().await))
}
