//! Worker协调器
//!
//! 跟踪已连接的Worker，向轮询的Worker分发执行组，回收结果，
//! 并把模块生命周期事件推送给所有在线Worker。

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use batchhost_core::config::CoordinatorConfig;
use batchhost_core::models::{
    ExecutionGroup, GroupAssignment, GroupExecutionStatistics, GroupRequests, GroupResults,
    GroupSpecification, JobCounters, MasterMessage, ModuleAction, ModuleEvent, OpaqueData,
    OpaqueRequest, WorkerInfo,
};
use batchhost_core::traits::{
    ExecutionGroupSource, JobStore, ModuleEventListener, SecurityServiceFactory, StatisticsSink,
};
use batchhost_core::HostResult;
use batchhost_module::ModuleRegistry;

use crate::now_ms;
use crate::security::SecurityProxy;
use crate::worker::Worker;

/// 协调器依赖的外部服务
#[derive(Clone)]
pub struct CoordinatorServices {
    pub job_store: Arc<dyn JobStore>,
    pub group_source: Arc<dyn ExecutionGroupSource>,
    pub statistics: Arc<dyn StatisticsSink>,
    pub security_factory: Arc<dyn SecurityServiceFactory>,
}

pub struct WorkerCoordinator {
    pub(crate) registry: Arc<ModuleRegistry>,
    pub(crate) job_store: Arc<dyn JobStore>,
    pub(crate) group_source: Arc<dyn ExecutionGroupSource>,
    statistics: Arc<dyn StatisticsSink>,
    pub(crate) security: SecurityProxy,
    pub(crate) config: CoordinatorConfig,
    pub(crate) workers: RwLock<BTreeMap<String, Arc<Worker>>>,
    /// 每个Worker ID上打开的会话数
    pub(crate) session_counts: Mutex<HashMap<String, usize>>,
    pub(crate) next_session_id: AtomicU64,
    running: AtomicBool,
}

impl WorkerCoordinator {
    /// 创建协调器并注册为模块事件监听器
    pub async fn new(
        registry: Arc<ModuleRegistry>,
        services: CoordinatorServices,
        config: CoordinatorConfig,
    ) -> Arc<Self> {
        let coordinator = Arc::new(Self {
            security: SecurityProxy::new(registry.clone(), services.security_factory),
            registry: registry.clone(),
            job_store: services.job_store,
            group_source: services.group_source,
            statistics: services.statistics,
            config,
            workers: RwLock::new(BTreeMap::new()),
            session_counts: Mutex::new(HashMap::new()),
            next_session_id: AtomicU64::new(1),
            running: AtomicBool::new(true),
        });
        registry
            .add_module_event_listener(coordinator.clone() as Arc<dyn ModuleEventListener>)
            .await;
        coordinator
    }

    pub fn registry(&self) -> &Arc<ModuleRegistry> {
        &self.registry
    }

    pub fn security(&self) -> &SecurityProxy {
        &self.security
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// 停止分发并从注册表注销
    pub async fn shutdown(self: &Arc<Self>) {
        info!("关闭Worker协调器");
        self.running.store(false, Ordering::SeqCst);
        let listener: Arc<dyn ModuleEventListener> = self.clone();
        self.registry.remove_module_event_listener(&listener).await;
    }

    pub async fn worker(&self, worker_id: &str) -> Option<Arc<Worker>> {
        self.workers.read().await.get(worker_id).cloned()
    }

    pub async fn workers(&self) -> Vec<Arc<Worker>> {
        self.workers.read().await.values().cloned().collect()
    }

    pub async fn worker_infos(&self) -> Vec<WorkerInfo> {
        self.workers().await.iter().map(|worker| worker.info()).collect()
    }

    /// 查找Worker，不存在或启动时间不同时创建新的Worker
    pub(crate) async fn get_or_create_worker(&self, worker_id: &str, start_time: i64) -> (Arc<Worker>, bool) {
        let mut workers = self.workers.write().await;
        let existing = workers
            .get(worker_id)
            .filter(|worker| worker.start_time() == start_time)
            .cloned();
        if let Some(worker) = existing {
            return (worker, false);
        }

        let worker = Arc::new(Worker::new(worker_id, start_time));
        let previous = workers.insert(worker_id.to_string(), worker.clone());
        drop(workers);
        match previous {
            Some(previous) => {
                info!(worker_id = %worker_id, start_time, "Worker已重启，替换旧的Worker记录");
                self.reschedule_groups(previous.executing_groups(), &previous).await;
            }
            None => info!(worker_id = %worker_id, start_time, "新Worker连接"),
        }
        (worker, true)
    }

    /// 刷新Worker的最后联系时间
    pub async fn set_worker_connect_time(&self, worker_id: &str, start_time: i64) {
        if let Some(worker) = self.worker(worker_id).await {
            if worker.start_time() == start_time {
                worker.touch();
            }
        }
    }

    /// 移除Worker并重新调度它持有的执行组
    pub async fn remove_worker(&self, worker_id: &str) -> Option<Arc<Worker>> {
        let worker = self.workers.write().await.remove(worker_id)?;
        let groups: Vec<Arc<ExecutionGroup>> = worker
            .executing_group_ids()
            .iter()
            .filter_map(|group_id| worker.remove_executing_group(group_id))
            .collect();
        self.reschedule_groups(groups, &worker).await;
        Some(worker)
    }

    /// Worker轮询下一个执行组
    ///
    /// 只会返回已启动模块的执行组；指定模块名过滤时，只返回这些模块的执行组。
    /// 没有可分发的执行组时立即返回 `None`。
    pub async fn next_group(
        &self,
        worker_id: &str,
        start_time: i64,
        module_names: Option<&[String]>,
    ) -> HostResult<Option<GroupAssignment>> {
        let (worker, _) = self.get_or_create_worker(worker_id, start_time).await;
        worker.touch();
        if !self.is_running() {
            return Ok(None);
        }

        let mut allowed: Vec<String> = self
            .registry
            .started_modules()
            .await
            .iter()
            .map(|module| module.name().to_string())
            .collect();
        if let Some(module_names) = module_names {
            allowed.retain(|name| module_names.contains(name));
        }
        if allowed.is_empty() {
            return Ok(None);
        }

        let Some(group) = self.group_source.next_group(Some(allowed.as_slice())).await? else {
            return Ok(None);
        };
        if group.is_cancelled() {
            return Ok(None);
        }

        let Some(module) = self
            .registry
            .module_for_business_application(group.business_application_name())
            .await
        else {
            debug!(group_id = %group.id(), "业务应用不可用，重新调度执行组");
            self.group_source.reschedule_group(group).await?;
            return Ok(None);
        };
        let module_time = module.started_time();
        let application = module.business_application(group.business_application_name());
        let dispatchable = module.is_started()
            && module_time > 0
            && module.name() == group.module_name()
            && allowed.iter().any(|name| name == module.name());
        let Some(application) = application.filter(|_| dispatchable) else {
            self.group_source.schedule_group(group).await?;
            return Ok(None);
        };

        if !group.assign_to(worker_id) {
            warn!(
                group_id = %group.id(),
                assigned = ?group.assigned_worker(),
                "执行组已分配给其他Worker"
            );
            return Ok(None);
        }
        group.set_execution_start_time(now_ms());
        worker.add_executing_group(module.name(), module_time, group.clone());
        metrics::counter!("batchhost_groups_dispatched_total", "module" => module.name().to_string())
            .increment(1);
        info!(
            group_id = %group.id(),
            worker_id = %worker_id,
            application = %application.name,
            "开始执行组"
        );

        Ok(Some(GroupAssignment {
            worker_id: worker_id.to_string(),
            module_name: module.name().to_string(),
            module_time,
            business_application_name: application.name.clone(),
            business_application_version: application.version.clone(),
            log_level: application.log_level.clone(),
            batch_job_id: group.job_id().to_string(),
            base_id: group.base_id().to_string(),
            group_id: group.id(),
            consumer_key: group.consumer_key().to_string(),
        }))
    }

    async fn executing_group(&self, worker_id: &str, group_id: &str) -> Option<(Arc<Worker>, Arc<ExecutionGroup>)> {
        let worker = self.worker(worker_id).await?;
        let group = worker.executing_group(group_id)?;
        Some((worker, group))
    }

    /// 执行组的完整描述；执行组已取消或不存在时返回 `None`
    pub async fn group_specification(
        &self,
        worker_id: &str,
        group_id: &str,
    ) -> HostResult<Option<GroupSpecification>> {
        let Some((worker, group)) = self.executing_group(worker_id, group_id).await else {
            return Ok(None);
        };
        if group.is_cancelled() {
            return Ok(None);
        }

        let module = self.registry.get_module(group.module_name()).await;
        let application = module
            .as_ref()
            .filter(|module| module.is_started())
            .and_then(|module| module.business_application(group.business_application_name()));
        let (Some(module), Some(application)) = (module, application) else {
            info!(group_id = %group_id, "模块未启动，重新调度执行组");
            self.cancel_group(&worker, group_id).await?;
            return Ok(None);
        };

        let requests = if application.per_request_input_data {
            let mut items: Vec<OpaqueRequest> = group
                .request_ids()
                .iter()
                .map(|sequence_number| OpaqueRequest { sequence_number })
                .collect();
            if items.is_empty() {
                items.push(OpaqueRequest {
                    sequence_number: group.sequence_number(),
                });
            }
            GroupRequests::Opaque { items }
        } else {
            match self
                .job_store
                .group_structured_input(group.job_id(), group.sequence_number())
                .await?
            {
                Some(input) => GroupRequests::Structured(input),
                None => return Ok(None),
            }
        };

        Ok(Some(GroupSpecification {
            worker_id: worker_id.to_string(),
            group_id: group_id.to_string(),
            consumer_key: group.consumer_key().to_string(),
            batch_job_id: group.job_id().to_string(),
            module_name: module.name().to_string(),
            module_time: module.started_time(),
            business_application_name: application.name.clone(),
            application_parameters: group.application_parameters().clone(),
            result_data_content_type: application
                .per_request_result_data
                .then(|| group.result_data_content_type().map(str::to_string))
                .flatten(),
            requests,
        }))
    }

    /// 单个请求的不透明输入数据
    pub async fn request_input_data(
        &self,
        worker_id: &str,
        group_id: &str,
        sequence_number: u32,
    ) -> HostResult<Option<OpaqueData>> {
        match self.executing_group(worker_id, group_id).await {
            Some((_, group)) if !group.is_cancelled() => {
                self.job_store
                    .request_opaque_input(group.job_id(), sequence_number)
                    .await
            }
            _ => Ok(None),
        }
    }

    /// 提交执行组结果
    ///
    /// 结果合并成功后执行组才从Worker上移除；执行组已取消或作业已完成时不做任何修改。
    /// 返回合并后的作业计数，未合并时返回 `None`。
    pub async fn submit_results(
        &self,
        worker_id: &str,
        group_id: &str,
        results: GroupResults,
    ) -> HostResult<Option<JobCounters>> {
        let Some(worker) = self.worker(worker_id).await else {
            return Ok(None);
        };
        let Some(group) = worker.executing_group(group_id) else {
            debug!(worker_id = %worker_id, group_id = %group_id, "执行组不在Worker上，忽略结果");
            return Ok(None);
        };
        if group.is_cancelled() || self.job_store.is_job_completed(group.job_id()).await? {
            debug!(group_id = %group_id, "作业已完成或执行组已取消，忽略结果");
            self.detach_group(&worker, group_id);
            return Ok(None);
        }

        // 存储失败时执行组仍留在Worker上，Worker可以重新提交
        let counters = self
            .job_store
            .record_group_results(
                group.job_id(),
                group.sequence_number(),
                &results.completed_request_range,
                &results.failed_request_range,
                results.results,
            )
            .await?;
        if !self.detach_group(&worker, group_id) {
            debug!(group_id = %group_id, "执行组结果已由其他请求处理");
            return Ok(Some(counters));
        }

        let execution_time = now_ms() - group.execution_start_time();
        self.statistics
            .record_group_execution(GroupExecutionStatistics {
                business_application_name: group.business_application_name().to_string(),
                module_name: group.module_name().to_string(),
                worker_id: worker_id.to_string(),
                group_id: group_id.to_string(),
                completed_requests: results.completed_request_range.size(),
                failed_requests: results.failed_request_range.size(),
                group_executed_time: results.group_executed_time,
                application_executed_time: results.application_executed_time,
                execution_time,
            })
            .await?;
        metrics::counter!("batchhost_groups_completed_total", "module" => group.module_name().to_string())
            .increment(1);
        info!(
            group_id = %group_id,
            worker_id = %worker_id,
            time = execution_time as f64 / 1000.0,
            "结束执行组"
        );
        Ok(Some(counters))
    }

    fn detach_group(&self, worker: &Worker, group_id: &str) -> bool {
        match worker.remove_executing_group(group_id) {
            Some(group) => {
                group.release();
                true
            }
            None => false,
        }
    }

    /// 记录执行组错误；执行组已取消时忽略
    pub async fn submit_error(&self, worker_id: &str, group_id: &str, error: String) -> HostResult<bool> {
        match self.executing_group(worker_id, group_id).await {
            Some((_, group)) if !group.is_cancelled() => {
                self.job_store
                    .set_group_error(group.job_id(), group.sequence_number(), error)
                    .await?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// 保存单个请求的不透明结果；仅对按请求输出结果数据的业务应用有效
    pub async fn submit_opaque_result(
        &self,
        worker_id: &str,
        group_id: &str,
        sequence_number: u32,
        data: OpaqueData,
    ) -> HostResult<bool> {
        let Some((_, group)) = self.executing_group(worker_id, group_id).await else {
            return Ok(false);
        };
        if group.is_cancelled() {
            return Ok(false);
        }
        let per_request_result_data = self
            .registry
            .get_business_application(group.business_application_name())
            .await
            .is_some_and(|application| application.per_request_result_data);
        if !per_request_result_data {
            return Ok(false);
        }
        let data = match group.result_data_content_type() {
            Some(content_type) => OpaqueData {
                content_type: content_type.to_string(),
                data: data.data,
            },
            None => data,
        };
        self.job_store
            .save_opaque_result(group.job_id(), sequence_number, data)
            .await?;
        Ok(true)
    }

    /// 从Worker上移除执行组，生成新的执行组ID后重新调度
    pub async fn cancel_group(&self, worker: &Worker, group_id: &str) -> HostResult<bool> {
        let Some(group) = worker.remove_executing_group(group_id) else {
            return Ok(false);
        };
        info!(worker_id = %worker.id(), group_id = %group_id, "重新调度执行组");
        group.reset_id();
        self.group_source.reschedule_group(group).await?;
        Ok(true)
    }

    /// 用Worker上报的执行中执行组刷新分配；超过保护期且未上报的执行组被重新调度
    pub async fn update_executing_groups(&self, worker: &Worker, executing_group_ids: &[String]) -> HostResult<usize> {
        let min_start_time = now_ms() - self.config.executing_group_grace_seconds * 1000;
        let mut cancelled = 0;
        for group in worker.executing_groups() {
            if group.execution_start_time() < min_start_time {
                let group_id = group.id();
                if !executing_group_ids.contains(&group_id) && self.cancel_group(worker, &group_id).await? {
                    cancelled += 1;
                }
            }
        }
        Ok(cancelled)
    }

    /// 取消作业：标记其执行组并通知持有这些执行组的Worker
    pub async fn cancel_job(&self, job_id: &str) -> bool {
        let mut found = false;
        for worker in self.workers().await {
            for group in worker.remove_job_groups(job_id) {
                found = true;
                group.cancel();
                worker.send_message(MasterMessage::CancelGroup {
                    batch_job_id: job_id.to_string(),
                    group_id: group.id(),
                });
            }
        }
        found
    }

    /// 重新调度执行组，单个失败只记录日志
    pub(crate) async fn reschedule_groups(&self, groups: Vec<Arc<ExecutionGroup>>, worker: &Worker) {
        for group in groups {
            group.reset_id();
            if let Err(e) = self.group_source.reschedule_group(group.clone()).await {
                warn!(worker_id = %worker.id(), group_id = %group.id(), "重新调度执行组失败: {}", e);
            }
        }
    }

    /// 向所有在线Worker广播消息
    pub async fn broadcast(&self, message: MasterMessage) -> usize {
        self.workers()
            .await
            .iter()
            .filter(|worker| worker.send_message(message.clone()))
            .count()
    }

    pub(crate) fn session_count(&self, worker_id: &str) -> usize {
        self.session_counts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(worker_id)
            .copied()
            .unwrap_or(0)
    }
}

#[async_trait]
impl ModuleEventListener for WorkerCoordinator {
    async fn module_changed(&self, event: &ModuleEvent) -> HostResult<()> {
        if event.action == ModuleAction::Stop {
            let module_name_and_time = event.module_name_and_time();
            for worker in self.workers().await {
                let groups = worker.cancel_executing_groups(&module_name_and_time);
                if !groups.is_empty() {
                    info!(
                        worker_id = %worker.id(),
                        module = %module_name_and_time,
                        count = groups.len(),
                        "模块已停止，重新调度执行组"
                    );
                    self.reschedule_groups(groups, &worker).await;
                }
            }
        }

        let sent = self
            .broadcast(MasterMessage::ModuleChanged {
                action: event.action,
                module_name: event.module_name.clone(),
                module_time: event.module_time,
            })
            .await;
        debug!(module = %event.module_name, action = %event.action, workers = sent, "推送模块事件");
        Ok(())
    }
}

impl std::fmt::Debug for WorkerCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerCoordinator")
            .field("running", &self.is_running())
            .finish()
    }
}
