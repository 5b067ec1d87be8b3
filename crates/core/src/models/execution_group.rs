use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, Ordering};
use std::sync::Mutex;

use super::range::RangeSet;

/// 一次分发给单个Worker的作业请求批次
///
/// 由外部调度器创建并交给协调器分发。执行组ID为 `<作业ID>-<序号>-<尝试次数>`，
/// 每次重新调度都会增加尝试次数；基础ID `<作业ID>-<序号>` 在整个生命周期内不变。
#[derive(Debug)]
pub struct ExecutionGroup {
    job_id: String,
    sequence_number: u32,
    base_id: String,
    business_application_name: String,
    module_name: String,
    consumer_key: String,
    application_parameters: BTreeMap<String, String>,
    result_data_content_type: Option<String>,
    request_ids: RangeSet,
    attempt: AtomicU32,
    cancelled: AtomicBool,
    module_start_time: AtomicI64,
    execution_start_time: AtomicI64,
    assigned_worker: Mutex<Option<String>>,
}

impl ExecutionGroup {
    pub fn new(
        job_id: impl Into<String>,
        sequence_number: u32,
        business_application_name: impl Into<String>,
        module_name: impl Into<String>,
        consumer_key: impl Into<String>,
    ) -> Self {
        let job_id = job_id.into();
        let base_id = format!("{job_id}-{sequence_number}");
        Self {
            job_id,
            sequence_number,
            base_id,
            business_application_name: business_application_name.into(),
            module_name: module_name.into(),
            consumer_key: consumer_key.into(),
            application_parameters: BTreeMap::new(),
            result_data_content_type: None,
            request_ids: RangeSet::new(),
            attempt: AtomicU32::new(1),
            cancelled: AtomicBool::new(false),
            module_start_time: AtomicI64::new(0),
            execution_start_time: AtomicI64::new(0),
            assigned_worker: Mutex::new(None),
        }
    }

    pub fn with_application_parameters(mut self, parameters: BTreeMap<String, String>) -> Self {
        self.application_parameters = parameters;
        self
    }

    pub fn with_result_data_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.result_data_content_type = Some(content_type.into());
        self
    }

    pub fn with_request_ids(mut self, request_ids: RangeSet) -> Self {
        self.request_ids = request_ids;
        self
    }

    /// 当前尝试的执行组ID
    pub fn id(&self) -> String {
        format!("{}-{}", self.base_id, self.attempt.load(Ordering::SeqCst))
    }

    pub fn base_id(&self) -> &str {
        &self.base_id
    }

    /// 从执行组ID中去掉尝试次数得到基础ID
    pub fn base_id_of(group_id: &str) -> &str {
        match group_id.rsplit_once('-') {
            Some((base_id, attempt)) if attempt.chars().all(|c| c.is_ascii_digit()) => base_id,
            _ => group_id,
        }
    }

    pub fn attempt(&self) -> u32 {
        self.attempt.load(Ordering::SeqCst)
    }

    /// 重新调度前生成新的执行组ID
    pub fn reset_id(&self) -> String {
        self.attempt.fetch_add(1, Ordering::SeqCst);
        self.id()
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn sequence_number(&self) -> u32 {
        self.sequence_number
    }

    pub fn business_application_name(&self) -> &str {
        &self.business_application_name
    }

    pub fn module_name(&self) -> &str {
        &self.module_name
    }

    pub fn consumer_key(&self) -> &str {
        &self.consumer_key
    }

    pub fn application_parameters(&self) -> &BTreeMap<String, String> {
        &self.application_parameters
    }

    pub fn result_data_content_type(&self) -> Option<&str> {
        self.result_data_content_type.as_deref()
    }

    pub fn request_ids(&self) -> &RangeSet {
        &self.request_ids
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn module_start_time(&self) -> i64 {
        self.module_start_time.load(Ordering::SeqCst)
    }

    pub fn set_module_start_time(&self, time: i64) {
        self.module_start_time.store(time, Ordering::SeqCst);
    }

    pub fn execution_start_time(&self) -> i64 {
        self.execution_start_time.load(Ordering::SeqCst)
    }

    pub fn set_execution_start_time(&self, time: i64) {
        self.execution_start_time.store(time, Ordering::SeqCst);
    }

    /// `模块名:模块启动时间`
    pub fn module_name_and_time(&self) -> String {
        format!("{}:{}", self.module_name, self.module_start_time())
    }

    pub fn assigned_worker(&self) -> Option<String> {
        self.assigned_worker
            .lock()
            .map(|worker| worker.clone())
            .unwrap_or_default()
    }

    /// 分配给Worker；已分配给其他Worker时返回false
    pub fn assign_to(&self, worker_id: &str) -> bool {
        match self.assigned_worker.lock() {
            Ok(mut assigned) => match assigned.as_deref() {
                Some(current) if current != worker_id => false,
                _ => {
                    *assigned = Some(worker_id.to_string());
                    true
                }
            },
            Err(_) => false,
        }
    }

    pub fn release(&self) {
        if let Ok(mut assigned) = self.assigned_worker.lock() {
            *assigned = None;
        }
    }
}
