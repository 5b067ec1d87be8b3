use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, RwLock};
use tracing::{debug, error};

use batchhost_core::models::{ModuleControlAction, ModuleEvent};
use batchhost_core::traits::{ConfigPropertyStore, ModuleEventListener, UserGroupStore};
use batchhost_core::{HostError, HostResult};

use crate::control::ModuleControlCommand;
use crate::plugin::BuiltinPlugins;

/// 模块宿主的外部服务
#[derive(Clone, Default)]
pub struct ModuleServices {
    pub config_store: Option<Arc<dyn ConfigPropertyStore>>,
    pub user_group_store: Option<Arc<dyn UserGroupStore>>,
    pub builtin_plugins: BuiltinPlugins,
}

/// 注册表与其模块共享的上下文
///
/// 由注册表创建并显式传给每个模块，模块通过它发出生命周期事件和控制请求。
pub struct ModuleContext {
    environment_id: String,
    services: ModuleServices,
    listeners: RwLock<Vec<Arc<dyn ModuleEventListener>>>,
    control: Option<mpsc::Sender<ModuleControlCommand>>,
    closed: AtomicBool,
    generation: AtomicU64,
}

impl ModuleContext {
    pub(crate) fn new(
        environment_id: String,
        services: ModuleServices,
        control: Option<mpsc::Sender<ModuleControlCommand>>,
    ) -> Self {
        Self {
            environment_id,
            services,
            listeners: RwLock::new(Vec::new()),
            control,
            closed: AtomicBool::new(false),
            generation: AtomicU64::new(0),
        }
    }

    pub fn environment_id(&self) -> &str {
        &self.environment_id
    }

    pub fn services(&self) -> &ModuleServices {
        &self.services
    }

    pub(crate) fn uses_control_task(&self) -> bool {
        self.control.is_some()
    }

    /// 把控制命令放入队列；未启用控制任务时返回false，由调用方直接执行
    pub(crate) async fn request(
        &self,
        module_name: &str,
        action: ModuleControlAction,
    ) -> HostResult<bool> {
        match &self.control {
            Some(sender) => {
                sender
                    .send(ModuleControlCommand::new(module_name, action))
                    .await
                    .map_err(|_| HostError::ControlQueueClosed)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub async fn add_listener(&self, listener: Arc<dyn ModuleEventListener>) {
        self.listeners.write().await.push(listener);
    }

    pub async fn remove_listener(&self, listener: &Arc<dyn ModuleEventListener>) {
        self.listeners
            .write()
            .await
            .retain(|existing| !Arc::ptr_eq(existing, listener));
    }

    /// 同步通知所有监听器，监听器错误只记录日志
    pub async fn emit(&self, event: ModuleEvent) {
        if self.is_closed() {
            return;
        }

        metrics::counter!("batchhost_module_events_total", "action" => event.action.to_string())
            .increment(1);
        debug!(
            module = %event.module_name,
            action = %event.action,
            module_time = event.module_time,
            "发送模块事件"
        );

        let listeners = self.listeners.read().await.clone();
        for listener in listeners {
            if let Err(e) = listener.module_changed(&event).await {
                error!(
                    module = %event.module_name,
                    action = %event.action,
                    "模块事件监听器处理失败: {}",
                    e
                );
            }
        }
    }

    pub(crate) fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// 模块集合或其业务应用变化时递增，用于使反向索引失效
    pub(crate) fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    pub(crate) fn invalidate(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
    }
}
