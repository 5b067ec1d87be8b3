//! Worker协议接口，响应为协议定义的纯JSON，没有内容时返回 `{}`

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{header, HeaderMap},
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use serde_json::Value;

use batchhost_core::models::{GroupResults, OpaqueData};

use crate::{
    error::{ApiError, ApiResult},
    response::{empty_object, json_or_empty, success},
    routes::AppState,
};

/// 轮询参数
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NextGroupParams {
    /// 逗号分隔的模块名，只分发这些模块的执行组
    pub module_name: Option<String>,
}

impl NextGroupParams {
    fn module_names(&self) -> Option<Vec<String>> {
        self.module_name.as_ref().map(|names| {
            names
                .split(',')
                .map(str::trim)
                .filter(|name| !name.is_empty())
                .map(str::to_string)
                .collect()
        })
    }
}

/// 执行组ID必须属于路径中的作业
fn group_in_job(job_id: &str, group_id: &str) -> bool {
    group_id
        .strip_prefix(job_id)
        .is_some_and(|rest| rest.starts_with('-'))
}

pub async fn next_group(
    State(state): State<AppState>,
    Path((worker_id, start_time)): Path<(String, i64)>,
    Query(params): Query<NextGroupParams>,
) -> ApiResult<Json<Value>> {
    let module_names = params.module_names();
    let assignment = state
        .coordinator
        .next_group(&worker_id, start_time, module_names.as_deref())
        .await?;
    Ok(json_or_empty(assignment)?)
}

pub async fn group_specification(
    State(state): State<AppState>,
    Path((worker_id, job_id, group_id)): Path<(String, String, String)>,
) -> ApiResult<Json<Value>> {
    if !group_in_job(&job_id, &group_id) {
        return Ok(empty_object());
    }
    let specification = state
        .coordinator
        .group_specification(&worker_id, &group_id)
        .await?;
    Ok(json_or_empty(specification)?)
}

pub async fn submit_results(
    State(state): State<AppState>,
    Path((worker_id, job_id, group_id)): Path<(String, String, String)>,
    Json(results): Json<GroupResults>,
) -> ApiResult<Json<Value>> {
    if !group_in_job(&job_id, &group_id) {
        return Ok(empty_object());
    }
    let counters = state
        .coordinator
        .submit_results(&worker_id, &group_id, results)
        .await?;
    Ok(json_or_empty(counters)?)
}

/// 执行组错误，请求体为错误文本
pub async fn submit_error(
    State(state): State<AppState>,
    Path((worker_id, job_id, group_id)): Path<(String, String, String)>,
    body: String,
) -> ApiResult<Json<Value>> {
    if group_in_job(&job_id, &group_id) {
        state
            .coordinator
            .submit_error(&worker_id, &group_id, body)
            .await?;
    }
    Ok(empty_object())
}

pub async fn request_input_data(
    State(state): State<AppState>,
    Path((worker_id, job_id, group_id, sequence_number)): Path<(String, String, String, u32)>,
) -> ApiResult<Response> {
    if !group_in_job(&job_id, &group_id) {
        return Err(ApiError::NotFound);
    }
    let data = state
        .coordinator
        .request_input_data(&worker_id, &group_id, sequence_number)
        .await?
        .ok_or(ApiError::NotFound)?;
    Ok(([(header::CONTENT_TYPE, data.content_type)], data.data).into_response())
}

/// 单个请求的不透明结果，内容类型取自请求头
pub async fn submit_result_data(
    State(state): State<AppState>,
    Path((worker_id, job_id, group_id, sequence_number)): Path<(String, String, String, u32)>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<Value>> {
    if !group_in_job(&job_id, &group_id) {
        return Err(ApiError::NotFound);
    }
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("application/octet-stream")
        .to_string();
    let saved = state
        .coordinator
        .submit_opaque_result(
            &worker_id,
            &group_id,
            sequence_number,
            OpaqueData {
                content_type,
                data: body.to_vec(),
            },
        )
        .await?;
    if !saved {
        return Err(ApiError::Conflict(format!("无法保存执行组 {group_id} 的请求结果")));
    }
    Ok(empty_object())
}

/// 管理接口：已连接的Worker
pub async fn list_workers(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    Ok(success(state.coordinator.worker_infos().await))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_group_in_job() {
        assert!(group_in_job("J1", "J1-2-1"));
        assert!(!group_in_job("J1", "J10-2-1"));
        assert!(!group_in_job("J2", "J1-2-1"));
    }

    #[test]
    fn test_module_name_filter() {
        let params = NextGroupParams {
            module_name: Some("geo, maps,".into()),
        };
        assert_eq!(params.module_names().unwrap(), vec!["geo", "maps"]);
        assert!(NextGroupParams::default().module_names().is_none());
    }
}
