use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::Router;
use tokio::{net::TcpListener, sync::broadcast, task::JoinHandle};
use tracing::{error, info};

use batchhost_api::{create_app, AppState};
use batchhost_coordinator::{CoordinatorServices, WorkerCoordinator, WorkerFailureDetector};
use batchhost_core::AppConfig;
use batchhost_infrastructure::{
    CachingSecurityServiceFactory, InMemoryConfigPropertyStore, InMemoryGroupQueue,
    InMemoryJobStore, InMemoryStatisticsSink, InMemoryUserGroupStore,
};
use batchhost_module::{
    BuiltinPlugins, ConfiguredModuleSource, DirectoryModuleSource, ModuleRegistry, ModuleServices,
};

/// 主应用程序
///
/// 外部协作者使用内存实现；作业和执行组通过 [`job_store`](Self::job_store)
/// 和 [`group_queue`](Self::group_queue) 提交。
pub struct Application {
    config: AppConfig,
    registry: Arc<ModuleRegistry>,
    coordinator: Arc<WorkerCoordinator>,
    detector: Arc<WorkerFailureDetector>,
    job_store: Arc<InMemoryJobStore>,
    group_queue: Arc<InMemoryGroupQueue>,
    config_store: Arc<InMemoryConfigPropertyStore>,
    user_groups: Arc<InMemoryUserGroupStore>,
    statistics: Arc<InMemoryStatisticsSink>,
}

impl Application {
    pub async fn new(config: AppConfig, builtin_plugins: BuiltinPlugins) -> Result<Self> {
        config.validate()?;
        info!(environment = %config.registry.environment_id, "初始化模块宿主");

        let config_store = Arc::new(InMemoryConfigPropertyStore::new());
        let user_groups = Arc::new(InMemoryUserGroupStore::new());
        let registry = ModuleRegistry::new(
            config.registry.clone(),
            ModuleServices {
                config_store: Some(config_store.clone()),
                user_group_store: Some(user_groups.clone()),
                builtin_plugins,
            },
        );

        if let Some(directory) = &config.modules.directory {
            info!("模块目录: {}", directory.display());
            registry
                .add_module_source(Arc::new(DirectoryModuleSource::new(directory)))
                .await;
        }
        if !config.modules.configured.is_empty() {
            registry
                .add_module_source(Arc::new(ConfiguredModuleSource::new(
                    config.modules.configured.clone(),
                )))
                .await;
        }

        let security_factory = Arc::new(CachingSecurityServiceFactory::new(user_groups.clone()));
        registry
            .add_module_event_listener(security_factory.clone())
            .await;

        let job_store = Arc::new(InMemoryJobStore::new());
        let group_queue = Arc::new(InMemoryGroupQueue::new());
        let statistics = Arc::new(InMemoryStatisticsSink::new());
        let coordinator = WorkerCoordinator::new(
            registry.clone(),
            CoordinatorServices {
                job_store: job_store.clone(),
                group_source: group_queue.clone(),
                statistics: statistics.clone(),
                security_factory,
            },
            config.coordinator.clone(),
        )
        .await;
        let detector = Arc::new(WorkerFailureDetector::new(coordinator.clone()));

        Ok(Self {
            config,
            registry,
            coordinator,
            detector,
            job_store,
            group_queue,
            config_store,
            user_groups,
            statistics,
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<ModuleRegistry> {
        &self.registry
    }

    pub fn coordinator(&self) -> &Arc<WorkerCoordinator> {
        &self.coordinator
    }

    pub fn job_store(&self) -> &Arc<InMemoryJobStore> {
        &self.job_store
    }

    pub fn group_queue(&self) -> &Arc<InMemoryGroupQueue> {
        &self.group_queue
    }

    pub fn config_store(&self) -> &Arc<InMemoryConfigPropertyStore> {
        &self.config_store
    }

    pub fn user_groups(&self) -> &Arc<InMemoryUserGroupStore> {
        &self.user_groups
    }

    pub fn statistics(&self) -> &Arc<InMemoryStatisticsSink> {
        &self.statistics
    }

    /// 带中间件的HTTP路由
    pub fn router(&self) -> Router {
        create_app(AppState::new(self.coordinator.clone()), &self.config.server)
    }

    /// 加载模块并运行HTTP服务，直到收到关闭信号
    pub async fn run(&self, mut shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        self.registry.refresh_modules().await;
        info!("已加载 {} 个模块", self.registry.module_names().await.len());

        let refresh_handle = match self.config.modules.refresh_interval_seconds {
            0 => None,
            seconds => Some(self.registry.spawn_refresh_task(Duration::from_secs(seconds))),
        };
        let detector_handle = {
            let detector = Arc::clone(&self.detector);
            tokio::spawn(async move {
                if let Err(e) = detector.start_detection().await {
                    error!("失联Worker检测失败: {}", e);
                }
            })
        };

        let bind_address = &self.config.server.bind_address;
        let served = match TcpListener::bind(bind_address).await {
            Ok(listener) => {
                info!("HTTP服务启动在 http://{}", bind_address);
                axum::serve(listener, self.router())
                    .with_graceful_shutdown(async move {
                        let _ = shutdown_rx.recv().await;
                        info!("HTTP服务收到关闭信号");
                    })
                    .await
                    .context("HTTP服务运行失败")
            }
            Err(e) => Err(e).with_context(|| format!("绑定地址失败: {bind_address}")),
        };

        self.stop(refresh_handle, detector_handle).await;
        served
    }

    async fn stop(&self, refresh_handle: Option<JoinHandle<()>>, detector_handle: JoinHandle<()>) {
        self.detector.stop_detection().await;
        detector_handle.abort();
        if let Some(handle) = refresh_handle {
            handle.abort();
        }
        self.coordinator.shutdown().await;
        self.registry.shutdown().await;
        info!("模块宿主已停止");
    }
}
