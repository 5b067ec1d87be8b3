use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;

use batchhost_core::models::ExecutionGroup;
use batchhost_core::traits::ExecutionGroupSource;
use batchhost_core::HostResult;

/// 内存待分发执行组队列（先进先出）
#[derive(Debug, Default)]
pub struct InMemoryGroupQueue {
    groups: Mutex<VecDeque<Arc<ExecutionGroup>>>,
}

impl InMemoryGroupQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_group(&self, group: Arc<ExecutionGroup>) {
        self.groups.lock().await.push_back(group);
    }

    pub async fn len(&self) -> usize {
        self.groups.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.groups.lock().await.is_empty()
    }
}

#[async_trait]
impl ExecutionGroupSource for InMemoryGroupQueue {
    async fn next_group(&self, module_names: Option<&[String]>) -> HostResult<Option<Arc<ExecutionGroup>>> {
        let mut groups = self.groups.lock().await;
        // 已取消的执行组直接丢弃
        groups.retain(|group| !group.is_cancelled());
        let position = groups.iter().position(|group| match module_names {
            Some(names) => names.iter().any(|name| name == group.module_name()),
            None => true,
        });
        Ok(position.and_then(|index| groups.remove(index)))
    }

    async fn schedule_group(&self, group: Arc<ExecutionGroup>) -> HostResult<()> {
        self.groups.lock().await.push_back(group);
        Ok(())
    }

    async fn reschedule_group(&self, group: Arc<ExecutionGroup>) -> HostResult<()> {
        debug!(group_id = %group.id(), "重新调度执行组");
        group.release();
        self.groups.lock().await.push_back(group);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn group(job_id: &str, module_name: &str) -> Arc<ExecutionGroup> {
        Arc::new(ExecutionGroup::new(job_id, 1, "Wait", module_name, "consumer"))
    }

    #[tokio::test]
    async fn test_filter_by_module() {
        let queue = InMemoryGroupQueue::new();
        queue.add_group(group("J1", "geo")).await;
        queue.add_group(group("J2", "maps")).await;

        let names = vec!["maps".to_string()];
        let next = queue.next_group(Some(&names)).await.unwrap().unwrap();
        assert_eq!(next.job_id(), "J2");
        assert_eq!(queue.len().await, 1);

        let none: Vec<String> = Vec::new();
        assert!(queue.next_group(Some(&none)).await.unwrap().is_none());
        assert_eq!(queue.next_group(None).await.unwrap().unwrap().job_id(), "J1");
        assert!(queue.is_empty().await);
    }

    #[tokio::test]
    async fn test_cancelled_groups_skipped() {
        let queue = InMemoryGroupQueue::new();
        let cancelled = group("J1", "geo");
        cancelled.cancel();
        queue.add_group(cancelled).await;
        assert!(queue.next_group(None).await.unwrap().is_none());
        assert!(queue.is_empty().await);
    }

    #[tokio::test]
    async fn test_reschedule_releases_worker() {
        let queue = InMemoryGroupQueue::new();
        let group = group("J1", "geo");
        assert!(group.assign_to("W1"));
        queue.reschedule_group(group.clone()).await.unwrap();
        assert!(group.assigned_worker().is_none());
        assert_eq!(queue.len().await, 1);
    }
}
