use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::RwLock;

use batchhost_core::models::GroupExecutionStatistics;
use batchhost_core::traits::StatisticsSink;
use batchhost_core::HostResult;

/// 单个业务应用的累计执行统计
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationStatistics {
    pub executed_groups: u64,
    pub completed_requests: u64,
    pub failed_requests: u64,
    pub group_executed_time: i64,
    pub application_executed_time: i64,
    pub execution_time: i64,
}

/// 内存执行统计，同时写入 metrics 计数器
#[derive(Debug, Default)]
pub struct InMemoryStatisticsSink {
    by_application: RwLock<BTreeMap<String, ApplicationStatistics>>,
}

impl InMemoryStatisticsSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn application_statistics(&self, business_application_name: &str) -> Option<ApplicationStatistics> {
        self.by_application
            .read()
            .await
            .get(business_application_name)
            .cloned()
    }

    pub async fn all(&self) -> BTreeMap<String, ApplicationStatistics> {
        self.by_application.read().await.clone()
    }
}

#[async_trait]
impl StatisticsSink for InMemoryStatisticsSink {
    async fn record_group_execution(&self, statistics: GroupExecutionStatistics) -> HostResult<()> {
        let module = statistics.module_name.clone();
        let application = statistics.business_application_name.clone();
        metrics::counter!("batchhost_groups_executed_total", "module" => module.clone(), "application" => application.clone())
            .increment(1);
        metrics::counter!("batchhost_requests_completed_total", "module" => module.clone(), "application" => application.clone())
            .increment(statistics.completed_requests);
        metrics::counter!("batchhost_requests_failed_total", "module" => module, "application" => application)
            .increment(statistics.failed_requests);

        let mut by_application = self.by_application.write().await;
        let entry = by_application
            .entry(statistics.business_application_name)
            .or_default();
        entry.executed_groups += 1;
        entry.completed_requests += statistics.completed_requests;
        entry.failed_requests += statistics.failed_requests;
        entry.group_executed_time += statistics.group_executed_time;
        entry.application_executed_time += statistics.application_executed_time;
        entry.execution_time += statistics.execution_time;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_accumulates_per_application() {
        let sink = InMemoryStatisticsSink::new();
        for completed in [5, 3] {
            sink.record_group_execution(GroupExecutionStatistics {
                business_application_name: "Wait".into(),
                module_name: "geo".into(),
                worker_id: "W1".into(),
                group_id: "J1-1-1".into(),
                completed_requests: completed,
                failed_requests: 1,
                group_executed_time: 10,
                application_executed_time: 8,
                execution_time: 20,
            })
            .await
            .unwrap();
        }
        let statistics = sink.application_statistics("Wait").await.unwrap();
        assert_eq!(statistics.executed_groups, 2);
        assert_eq!(statistics.completed_requests, 8);
        assert_eq!(statistics.failed_requests, 2);
        assert_eq!(statistics.execution_time, 40);
        assert!(sink.application_statistics("Other").await.is_none());
    }
}
