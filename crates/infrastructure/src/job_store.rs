use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::debug;

use batchhost_core::models::{JobCounters, OpaqueData, RangeSet};
use batchhost_core::traits::JobStore;
use batchhost_core::{HostError, HostResult};

#[derive(Debug, Default)]
struct GroupRecord {
    structured_input: Option<Value>,
    results: Option<Value>,
    error: Option<String>,
}

#[derive(Debug, Default)]
struct JobRecord {
    num_requests: u64,
    completed: RangeSet,
    failed: RangeSet,
    cancelled: bool,
    groups: BTreeMap<u32, GroupRecord>,
    opaque_inputs: BTreeMap<u32, OpaqueData>,
    opaque_results: BTreeMap<u32, OpaqueData>,
}

impl JobRecord {
    fn counters(&self) -> JobCounters {
        let completed_requests = self.completed.size();
        let failed_requests = self.failed.size();
        JobCounters {
            num_requests: self.num_requests,
            completed_requests,
            failed_requests,
            completed: self.cancelled || completed_requests + failed_requests >= self.num_requests,
        }
    }
}

/// 内存作业存储
///
/// 请求计数以已完成/失败的序号集合求得，重复提交同一范围不会重复计数。
#[derive(Debug, Default)]
pub struct InMemoryJobStore {
    jobs: RwLock<HashMap<String, JobRecord>>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn create_job(&self, job_id: &str, num_requests: u64) {
        self.jobs.write().await.insert(
            job_id.to_string(),
            JobRecord {
                num_requests,
                ..JobRecord::default()
            },
        );
    }

    pub async fn set_group_input(&self, job_id: &str, sequence_number: u32, input: Value) -> HostResult<()> {
        let mut jobs = self.jobs.write().await;
        let job = job_mut(&mut jobs, job_id)?;
        job.groups.entry(sequence_number).or_default().structured_input = Some(input);
        Ok(())
    }

    pub async fn set_request_opaque_input(
        &self,
        job_id: &str,
        request_sequence_number: u32,
        data: OpaqueData,
    ) -> HostResult<()> {
        let mut jobs = self.jobs.write().await;
        job_mut(&mut jobs, job_id)?
            .opaque_inputs
            .insert(request_sequence_number, data);
        Ok(())
    }

    /// 取消作业，之后作业视为已完成
    pub async fn cancel_job(&self, job_id: &str) -> HostResult<()> {
        let mut jobs = self.jobs.write().await;
        job_mut(&mut jobs, job_id)?.cancelled = true;
        Ok(())
    }

    pub async fn group_error(&self, job_id: &str, sequence_number: u32) -> Option<String> {
        self.jobs
            .read()
            .await
            .get(job_id)
            .and_then(|job| job.groups.get(&sequence_number))
            .and_then(|group| group.error.clone())
    }

    pub async fn group_results(&self, job_id: &str, sequence_number: u32) -> Option<Value> {
        self.jobs
            .read()
            .await
            .get(job_id)
            .and_then(|job| job.groups.get(&sequence_number))
            .and_then(|group| group.results.clone())
    }

    pub async fn opaque_result(&self, job_id: &str, request_sequence_number: u32) -> Option<OpaqueData> {
        self.jobs
            .read()
            .await
            .get(job_id)
            .and_then(|job| job.opaque_results.get(&request_sequence_number))
            .cloned()
    }
}

fn job_mut<'a>(jobs: &'a mut HashMap<String, JobRecord>, job_id: &str) -> HostResult<&'a mut JobRecord> {
    jobs.get_mut(job_id)
        .ok_or_else(|| HostError::Store(format!("作业不存在: {job_id}")))
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn is_job_completed(&self, job_id: &str) -> HostResult<bool> {
        Ok(self
            .jobs
            .read()
            .await
            .get(job_id)
            .map(|job| job.counters().completed)
            .unwrap_or(true))
    }

    async fn job_counters(&self, job_id: &str) -> HostResult<Option<JobCounters>> {
        Ok(self.jobs.read().await.get(job_id).map(JobRecord::counters))
    }

    async fn record_group_results(
        &self,
        job_id: &str,
        sequence_number: u32,
        completed: &RangeSet,
        failed: &RangeSet,
        results: Option<Value>,
    ) -> HostResult<JobCounters> {
        let mut jobs = self.jobs.write().await;
        let job = job_mut(&mut jobs, job_id)?;
        job.completed.add_all(completed);
        job.failed.add_all(failed);
        if results.is_some() {
            job.groups.entry(sequence_number).or_default().results = results;
        }
        let counters = job.counters();
        debug!(
            job_id = %job_id,
            sequence_number,
            completed = counters.completed_requests,
            failed = counters.failed_requests,
            "合并执行组结果"
        );
        Ok(counters)
    }

    async fn set_group_error(&self, job_id: &str, sequence_number: u32, error: String) -> HostResult<()> {
        let mut jobs = self.jobs.write().await;
        job_mut(&mut jobs, job_id)?
            .groups
            .entry(sequence_number)
            .or_default()
            .error = Some(error);
        Ok(())
    }

    async fn save_opaque_result(
        &self,
        job_id: &str,
        request_sequence_number: u32,
        data: OpaqueData,
    ) -> HostResult<()> {
        let mut jobs = self.jobs.write().await;
        job_mut(&mut jobs, job_id)?
            .opaque_results
            .insert(request_sequence_number, data);
        Ok(())
    }

    async fn group_structured_input(&self, job_id: &str, sequence_number: u32) -> HostResult<Option<Value>> {
        Ok(self
            .jobs
            .read()
            .await
            .get(job_id)
            .and_then(|job| job.groups.get(&sequence_number))
            .and_then(|group| group.structured_input.clone()))
    }

    async fn request_opaque_input(
        &self,
        job_id: &str,
        request_sequence_number: u32,
    ) -> HostResult<Option<OpaqueData>> {
        Ok(self
            .jobs
            .read()
            .await
            .get(job_id)
            .and_then(|job| job.opaque_inputs.get(&request_sequence_number))
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn range(text: &str) -> RangeSet {
        text.parse().unwrap()
    }

    #[tokio::test]
    async fn test_duplicate_results_counted_once() {
        let store = InMemoryJobStore::new();
        store.create_job("J1", 5).await;

        let counters = store
            .record_group_results("J1", 1, &range("1-5"), &RangeSet::new(), None)
            .await
            .unwrap();
        assert_eq!(counters.completed_requests, 5);
        assert!(counters.completed);

        let counters = store
            .record_group_results("J1", 1, &range("1-5"), &RangeSet::new(), None)
            .await
            .unwrap();
        assert_eq!(counters.completed_requests, 5);
        assert!(store.is_job_completed("J1").await.unwrap());
    }

    #[tokio::test]
    async fn test_partial_and_failed_requests() {
        let store = InMemoryJobStore::new();
        store.create_job("J1", 10).await;
        let counters = store
            .record_group_results("J1", 1, &range("1-4"), &range("5"), Some(json!({"ok": true})))
            .await
            .unwrap();
        assert_eq!(counters.failed_requests, 1);
        assert!(!counters.completed);
        assert!(!store.is_job_completed("J1").await.unwrap());
        assert_eq!(store.group_results("J1", 1).await, Some(json!({"ok": true})));
    }

    #[tokio::test]
    async fn test_unknown_and_cancelled_jobs_are_completed() {
        let store = InMemoryJobStore::new();
        assert!(store.is_job_completed("missing").await.unwrap());
        assert!(store.job_counters("missing").await.unwrap().is_none());

        store.create_job("J2", 3).await;
        store.cancel_job("J2").await.unwrap();
        assert!(store.is_job_completed("J2").await.unwrap());
    }

    #[tokio::test]
    async fn test_group_data() {
        let store = InMemoryJobStore::new();
        store.create_job("J1", 2).await;
        store.set_group_input("J1", 1, json!({"requests": []})).await.unwrap();
        store
            .set_request_opaque_input(
                "J1",
                2,
                OpaqueData {
                    content_type: "text/plain".into(),
                    data: b"abc".to_vec(),
                },
            )
            .await
            .unwrap();
        store.set_group_error("J1", 1, "失败".into()).await.unwrap();

        assert!(store.group_structured_input("J1", 1).await.unwrap().is_some());
        assert_eq!(
            store.request_opaque_input("J1", 2).await.unwrap().map(|d| d.data),
            Some(b"abc".to_vec())
        );
        assert_eq!(store.group_error("J1", 1).await.as_deref(), Some("失败"));
        assert!(store
            .record_group_results("missing", 1, &RangeSet::new(), &RangeSet::new(), None)
            .await
            .is_err());
    }
}
