use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use super::range::RangeSet;

/// 分配给轮询Worker的执行组
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupAssignment {
    pub worker_id: String,
    pub module_name: String,
    pub module_time: i64,
    pub business_application_name: String,
    pub business_application_version: String,
    pub log_level: String,
    pub batch_job_id: String,
    pub base_id: String,
    pub group_id: String,
    pub consumer_key: String,
}

/// 执行组的请求数据
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum GroupRequests {
    /// 请求数据为不透明数据时，只给出序号，Worker再单独下载
    Opaque { items: Vec<OpaqueRequest> },
    /// 结构化请求文档
    Structured(Value),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpaqueRequest {
    pub sequence_number: u32,
}

/// 执行组的完整描述
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupSpecification {
    pub worker_id: String,
    pub group_id: String,
    pub consumer_key: String,
    pub batch_job_id: String,
    pub module_name: String,
    pub module_time: i64,
    pub business_application_name: String,
    pub application_parameters: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_data_content_type: Option<String>,
    pub requests: GroupRequests,
}

/// Worker提交的执行组结果
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GroupResults {
    pub completed_request_range: RangeSet,
    pub failed_request_range: RangeSet,
    /// 执行组总耗时（毫秒）
    pub group_executed_time: i64,
    /// 业务应用代码耗时（毫秒）
    pub application_executed_time: i64,
    pub results: Option<Value>,
}

/// 作业请求计数
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobCounters {
    pub num_requests: u64,
    pub completed_requests: u64,
    pub failed_requests: u64,
    pub completed: bool,
}

/// 执行组统计数据
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupExecutionStatistics {
    pub business_application_name: String,
    pub module_name: String,
    pub worker_id: String,
    pub group_id: String,
    pub completed_requests: u64,
    pub failed_requests: u64,
    pub group_executed_time: i64,
    pub application_executed_time: i64,
    /// 分配到结果提交的耗时（毫秒）
    pub execution_time: i64,
}

/// 不透明数据及其内容类型
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpaqueData {
    pub content_type: String,
    pub data: Vec<u8>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_results_defaults() {
        let results: GroupResults =
            serde_json::from_str(r#"{"completedRequestRange":"1-5"}"#).unwrap();
        assert_eq!(results.completed_request_range.size(), 5);
        assert!(results.failed_request_range.is_empty());
        assert_eq!(results.group_executed_time, 0);
    }

    #[test]
    fn test_opaque_requests_shape() {
        let requests = GroupRequests::Opaque {
            items: vec![OpaqueRequest { sequence_number: 3 }],
        };
        let json = serde_json::to_value(&requests).unwrap();
        assert_eq!(json["items"][0]["sequenceNumber"], 3);
    }
}
