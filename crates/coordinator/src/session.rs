//! Worker持久会话
//!
//! 会话以 `(workerId, startTime)` 标识，双向传递带 `type` 字段的JSON消息。
//! 无法解析或类型未知的消息只记录日志，不会关闭会话。

use std::collections::BTreeMap;
use std::sync::atomic::Ordering;
use std::sync::PoisonError;

use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use batchhost_core::models::{
    MasterMessage, ModuleAction, WorkerMessage, WorkerModuleState, WorkerModuleStatus,
};
use batchhost_core::HostResult;
use batchhost_module::GLOBAL_COMPONENT;

use crate::coordinator::WorkerCoordinator;
use crate::worker::Worker;

/// 一个已打开的Worker会话
#[derive(Debug)]
pub struct WorkerSession {
    pub worker_id: String,
    pub start_time: i64,
    pub session_id: u64,
    /// 主节点发往Worker的消息
    pub receiver: mpsc::Receiver<MasterMessage>,
}

impl WorkerCoordinator {
    /// 打开会话；对新的 `(workerId, startTime)` 推送所有已启动模块的 `START` 事件
    pub async fn open_session(&self, worker_id: &str, start_time: i64) -> WorkerSession {
        {
            let mut counts = self.session_counts.lock().unwrap_or_else(PoisonError::into_inner);
            *counts.entry(worker_id.to_string()).or_insert(0) += 1;
        }
        let (worker, created) = self.get_or_create_worker(worker_id, start_time).await;
        let session_id = self.next_session_id.fetch_add(1, Ordering::SeqCst);
        let (sender, receiver) = mpsc::channel(self.config.session_buffer_size);
        worker.set_session(session_id, sender);
        worker.touch();
        info!(worker_id = %worker_id, start_time, session_id, "Worker已连接");

        if created || worker.module_states().is_empty() {
            for module in self.registry.started_modules().await {
                worker.send_message(MasterMessage::ModuleChanged {
                    action: ModuleAction::Start,
                    module_name: module.name().to_string(),
                    module_time: module.started_time(),
                });
            }
        }

        WorkerSession {
            worker_id: worker_id.to_string(),
            start_time,
            session_id,
            receiver,
        }
    }

    pub async fn close_session(&self, worker_id: &str, session_id: u64) {
        info!(worker_id = %worker_id, session_id, "Worker已断开");
        {
            let mut counts = self.session_counts.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(count) = counts.get_mut(worker_id) {
                *count = count.saturating_sub(1);
                if *count == 0 {
                    counts.remove(worker_id);
                }
            }
        }
        if let Some(worker) = self.worker(worker_id).await {
            worker.clear_session(session_id);
        }
    }

    /// 处理会话上收到的文本消息
    pub async fn handle_text_message(&self, worker_id: &str, text: &str) {
        match serde_json::from_str::<WorkerMessage>(text) {
            Ok(message) => self.handle_message(worker_id, message).await,
            Err(e) => warn!(worker_id = %worker_id, "无法解析Worker消息: {} ({})", text, e),
        }
    }

    /// 按消息类型分派；处理失败只记录日志
    pub async fn handle_message(&self, worker_id: &str, message: WorkerMessage) {
        let Some(worker) = self.worker(worker_id).await else {
            debug!(worker_id = %worker_id, "Worker不存在，丢弃消息");
            return;
        };
        worker.touch();
        if let Err(e) = self.route(&worker, message).await {
            error!(worker_id = %worker_id, "无法处理Worker消息: {}", e);
        }
    }

    async fn route(&self, worker: &Worker, message: WorkerMessage) -> HostResult<()> {
        match message {
            WorkerMessage::ExecutingGroupIds { executing_group_ids } => {
                self.update_executing_groups(worker, &executing_group_ids).await?;
            }
            WorkerMessage::FailedGroupId { group_id } => {
                self.cancel_group(worker, &group_id).await?;
            }
            WorkerMessage::ModuleLoading {
                module_name,
                module_time,
            } => {
                self.set_module_state(worker, &module_name, |state| {
                    state.status = WorkerModuleStatus::Loading;
                    state.started_time = module_time;
                })
                .await;
            }
            WorkerMessage::ModuleStarted {
                module_name,
                module_time,
            } => {
                self.set_module_state(worker, &module_name, |state| {
                    state.status = WorkerModuleStatus::Started;
                    state.started_time = module_time;
                    state.module_error = None;
                })
                .await;
            }
            WorkerMessage::ModuleStartFailed {
                module_name,
                module_error,
            } => {
                self.set_module_state(worker, &module_name, |state| {
                    state.status = WorkerModuleStatus::StartFailed;
                    state.module_error = module_error;
                    state.started_time = 0;
                })
                .await;
            }
            WorkerMessage::ModuleStopped { module_name } => {
                self.set_module_state(worker, &module_name, |state| {
                    state.status = if state.enabled {
                        WorkerModuleStatus::Stopped
                    } else {
                        WorkerModuleStatus::Disabled
                    };
                    state.started_time = 0;
                })
                .await;
            }
            WorkerMessage::ModuleDisabled { module_name } => {
                self.set_module_state(worker, &module_name, |state| {
                    state.status = WorkerModuleStatus::Disabled;
                    state.started_time = 0;
                })
                .await;
            }
            WorkerMessage::ModuleConfigLoad {
                message_id,
                module_name,
                environment_name,
                component_name,
            } => {
                let properties = self
                    .module_config(
                        &module_name,
                        environment_name.as_deref(),
                        component_name.as_deref(),
                    )
                    .await?;
                worker.send_message(MasterMessage::ModuleConfig {
                    message_id,
                    properties,
                });
            }
            WorkerMessage::SecurityCanAccessResource {
                message_id,
                module_name,
                consumer_key,
                resource_class,
                resource_id,
                action_name,
            } => {
                let has_access = self
                    .security
                    .can_access_resource(
                        &module_name,
                        &consumer_key,
                        &resource_class,
                        &resource_id,
                        &action_name,
                    )
                    .await?;
                worker.send_message(MasterMessage::SecurityResult {
                    message_id,
                    has_access,
                    member_of_group: None,
                    attributes: None,
                });
            }
            WorkerMessage::SecurityCanPerformAction {
                message_id,
                module_name,
                consumer_key,
                action_name,
            } => {
                let has_access = self
                    .security
                    .can_perform_action(&module_name, &consumer_key, &action_name)
                    .await?;
                worker.send_message(MasterMessage::SecurityResult {
                    message_id,
                    has_access,
                    member_of_group: None,
                    attributes: None,
                });
            }
            WorkerMessage::SecurityIsMemberOfGroup {
                message_id,
                module_name,
                consumer_key,
                group_name,
            } => {
                let member_of_group = self
                    .security
                    .is_in_group(&module_name, &consumer_key, &group_name)
                    .await?;
                worker.send_message(MasterMessage::SecurityResult {
                    message_id,
                    has_access: None,
                    member_of_group,
                    attributes: None,
                });
            }
            WorkerMessage::SecurityUserAttributes {
                message_id,
                module_name,
                consumer_key,
            } => {
                let attributes = self
                    .security
                    .user_attributes(&module_name, &consumer_key)
                    .await?;
                worker.send_message(MasterMessage::SecurityResult {
                    message_id,
                    has_access: None,
                    member_of_group: None,
                    attributes,
                });
            }
            WorkerMessage::Unknown => {
                warn!(worker_id = %worker.id(), "未知的Worker消息类型");
            }
        }
        Ok(())
    }

    /// 更新Worker上的模块状态镜像，`enabled` 取自注册表
    async fn set_module_state<F>(&self, worker: &Worker, module_name: &str, update: F)
    where
        F: FnOnce(&mut WorkerModuleState),
    {
        let enabled = self
            .registry
            .get_module(module_name)
            .await
            .is_some_and(|module| module.is_enabled());
        worker.update_module_state(module_name, |state| {
            state.enabled = enabled;
            update(state);
            if !enabled {
                state.set_enabled(false);
            }
        });
    }

    /// `DEFAULT` 环境叠加指定环境后的模块配置属性
    pub async fn module_config(
        &self,
        module_name: &str,
        environment_name: Option<&str>,
        component_name: Option<&str>,
    ) -> HostResult<BTreeMap<String, serde_json::Value>> {
        let Some(store) = self.registry.context().services().config_store.clone() else {
            return Ok(BTreeMap::new());
        };
        let environment_name = environment_name.unwrap_or(self.registry.environment_id());
        let component_name = component_name.unwrap_or(GLOBAL_COMPONENT);
        store
            .effective_properties(environment_name, module_name, component_name)
            .await
    }

    /// Worker是否还有打开的会话
    pub(crate) fn has_open_sessions(&self, worker_id: &str) -> bool {
        self.session_count(worker_id) > 0
    }
}
