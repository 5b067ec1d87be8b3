//! 模块控制队列
//!
//! 启动/停止/重启命令进入有界队列，由单个消费任务按顺序执行，
//! 因此并发的外部触发不会交错修改同一模块的内部状态。

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex, Notify, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use batchhost_core::models::ModuleControlAction;

use crate::module::Module;

pub(crate) type ModuleMap = Arc<RwLock<BTreeMap<String, Arc<Module>>>>;

/// 控制命令
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleControlCommand {
    pub module_name: String,
    pub action: ModuleControlAction,
}

impl ModuleControlCommand {
    pub fn new(module_name: impl Into<String>, action: ModuleControlAction) -> Self {
        Self {
            module_name: module_name.into(),
            action,
        }
    }
}

/// 控制队列的消费任务
pub struct ModuleControlQueue {
    shutdown: Arc<Notify>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl ModuleControlQueue {
    /// 创建队列并启动消费任务
    pub(crate) fn spawn(
        capacity: usize,
        modules: ModuleMap,
    ) -> (Self, mpsc::Sender<ModuleControlCommand>) {
        let (sender, receiver) = mpsc::channel(capacity);
        let shutdown = Arc::new(Notify::new());
        let handle = tokio::spawn(Self::run(receiver, modules, shutdown.clone()));
        let queue = Self {
            shutdown,
            handle: Mutex::new(Some(handle)),
        };
        (queue, sender)
    }

    async fn run(
        mut receiver: mpsc::Receiver<ModuleControlCommand>,
        modules: ModuleMap,
        shutdown: Arc<Notify>,
    ) {
        info!("模块控制任务已启动");
        loop {
            tokio::select! {
                _ = shutdown.notified() => {
                    info!("收到停止信号，退出模块控制任务");
                    break;
                }
                command = receiver.recv() => {
                    let Some(command) = command else {
                        break;
                    };
                    let module = modules.read().await.get(&command.module_name).cloned();
                    match module {
                        Some(module) => {
                            debug!(module = %command.module_name, action = ?command.action, "执行模块控制命令");
                            // 命令在独立任务中执行，单个命令异常终止不会结束消费任务
                            let action = command.action;
                            let task = tokio::spawn({
                                let module = module.clone();
                                async move { module.run_control(action).await }
                            });
                            if let Err(e) = task.await {
                                error!(module = %command.module_name, action = ?action, "模块控制命令异常终止: {}", e);
                                module.control_failed(&format!("模块控制命令异常终止: {e}"));
                            }
                        }
                        None => {
                            warn!(module = %command.module_name, action = ?command.action, "控制命令对应的模块不存在");
                        }
                    }
                }
            }
        }
    }

    /// 停止消费任务，正在执行的命令会先完成
    pub async fn stop(&self) {
        self.shutdown.notify_one();
        if let Some(handle) = self.handle.lock().await.take() {
            if let Err(e) = handle.await {
                warn!("模块控制任务异常退出: {}", e);
            }
        }
    }
}
