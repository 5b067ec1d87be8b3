//! 外部作业层接口定义
//!
//! 模块宿主不拥有作业数据，以下接口由外部作业存储和调度器实现：
//! - `JobStore` - 作业计数、执行组输入输出与错误记录
//! - `ExecutionGroupSource` - 待分发执行组的队列
//! - `StatisticsSink` - 执行统计的接收方
//!
//! 所有方法均为异步，实现必须是 `Send + Sync`，协调器以 `Arc<dyn Trait>` 持有。

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::models::{ExecutionGroup, GroupExecutionStatistics, JobCounters, OpaqueData, RangeSet};
use crate::HostResult;

/// 作业存储接口
#[async_trait]
pub trait JobStore: Send + Sync {
    /// 作业是否已完成（或不存在）
    async fn is_job_completed(&self, job_id: &str) -> HostResult<bool>;

    /// 查询作业计数
    async fn job_counters(&self, job_id: &str) -> HostResult<Option<JobCounters>>;

    /// 合并已完成/失败的请求范围，并保存结构化结果
    async fn record_group_results(
        &self,
        job_id: &str,
        sequence_number: u32,
        completed: &RangeSet,
        failed: &RangeSet,
        results: Option<Value>,
    ) -> HostResult<JobCounters>;

    /// 记录执行组错误
    async fn set_group_error(&self, job_id: &str, sequence_number: u32, error: String)
        -> HostResult<()>;

    /// 保存单个请求的不透明结果数据
    async fn save_opaque_result(
        &self,
        job_id: &str,
        request_sequence_number: u32,
        data: OpaqueData,
    ) -> HostResult<()>;

    /// 执行组的结构化请求文档
    async fn group_structured_input(
        &self,
        job_id: &str,
        sequence_number: u32,
    ) -> HostResult<Option<Value>>;

    /// 单个请求的不透明输入数据
    async fn request_opaque_input(
        &self,
        job_id: &str,
        request_sequence_number: u32,
    ) -> HostResult<Option<OpaqueData>>;
}

/// 待分发执行组来源（外部调度器）
#[async_trait]
pub trait ExecutionGroupSource: Send + Sync {
    /// 取出下一个执行组；`module_names` 非空时只返回这些模块的执行组
    async fn next_group(
        &self,
        module_names: Option<&[String]>,
    ) -> HostResult<Option<Arc<ExecutionGroup>>>;

    /// 将未能分发的执行组放回队列
    async fn schedule_group(&self, group: Arc<ExecutionGroup>) -> HostResult<()>;

    /// 执行失败或Worker失联后重新调度
    async fn reschedule_group(&self, group: Arc<ExecutionGroup>) -> HostResult<()>;
}

/// 执行统计接收方
#[async_trait]
pub trait StatisticsSink: Send + Sync {
    async fn record_group_execution(&self, statistics: GroupExecutionStatistics) -> HostResult<()>;
}
