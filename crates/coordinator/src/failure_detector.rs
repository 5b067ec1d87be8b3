use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use batchhost_core::HostResult;

use crate::coordinator::WorkerCoordinator;
use crate::worker::Worker;

/// 失联Worker检测服务
///
/// 没有打开的会话、且最后联系时间超过空闲超时的Worker被视为失联：
/// 从协调器中移除，其持有的执行组重新调度。
pub struct WorkerFailureDetector {
    coordinator: Arc<WorkerCoordinator>,
    running: Arc<RwLock<bool>>,
}

impl WorkerFailureDetector {
    pub fn new(coordinator: Arc<WorkerCoordinator>) -> Self {
        Self {
            coordinator,
            running: Arc::new(RwLock::new(false)),
        }
    }

    /// 检查Worker是否失联
    fn is_worker_failed(&self, worker: &Worker, now: DateTime<Utc>) -> bool {
        if self.coordinator.has_open_sessions(worker.id()) {
            return false;
        }

        let idle = now - worker.last_connect_time();
        idle.num_seconds() > self.coordinator.config().worker_idle_timeout_seconds
    }

    /// 启动检测循环，直到调用 [`stop_detection`](Self::stop_detection)
    pub async fn start_detection(&self) -> HostResult<()> {
        info!("启动失联Worker检测服务");
        *self.running.write().await = true;
        self.detection_loop().await
    }

    pub async fn stop_detection(&self) {
        info!("停止失联Worker检测服务");
        *self.running.write().await = false;
    }

    async fn detection_loop(&self) -> HostResult<()> {
        let interval = Duration::from_secs(self.coordinator.config().detection_interval_seconds);

        loop {
            if !*self.running.read().await {
                info!("收到停止信号，退出失联Worker检测循环");
                break;
            }

            let failed_workers = self.detect_failed_workers().await;
            for worker in failed_workers {
                if let Err(e) = self.handle_failed_worker(&worker).await {
                    error!("处理失联Worker {} 时出错: {}", worker.id(), e);
                }
            }

            tokio::time::sleep(interval).await;
        }

        Ok(())
    }

    /// 检测失联的Worker
    pub async fn detect_failed_workers(&self) -> Vec<Arc<Worker>> {
        debug!("开始检测失联的Worker");
        let now = Utc::now();
        let mut failed_workers = Vec::new();
        for worker in self.coordinator.workers().await {
            if self.is_worker_failed(&worker, now) {
                warn!(
                    "检测到失联Worker: {} (上次联系: {})",
                    worker.id(),
                    worker.last_connect_time().format("%Y-%m-%d %H:%M:%S UTC")
                );
                failed_workers.push(worker);
            }
        }
        failed_workers
    }

    /// 移除失联Worker并重新调度它的执行组
    pub async fn handle_failed_worker(&self, worker: &Worker) -> HostResult<()> {
        let executing = worker.executing_count();
        // 检测期间Worker可能已经重新连接
        if self.coordinator.has_open_sessions(worker.id()) {
            return Ok(());
        }
        match self.coordinator.worker(worker.id()).await {
            Some(current) if current.start_time() == worker.start_time() => {
                self.coordinator.remove_worker(worker.id()).await;
                info!(
                    "已移除失联Worker {}，重新调度 {} 个执行组",
                    worker.id(),
                    executing
                );
            }
            _ => debug!("失联Worker {} 已被替换", worker.id()),
        }
        Ok(())
    }
}
