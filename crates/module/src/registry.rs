//! 模块注册表
//!
//! 进程内所有模块的目录：已加载哪些模块、各自处于什么状态。
//! 注册表由应用显式创建并传递，监听器通过 [`ModuleRegistry::add_module_event_listener`] 注册。

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use batchhost_core::config::RegistryConfig;
use batchhost_core::models::{BusinessApplication, ModuleAction, ModuleEvent, ModuleInfo};
use batchhost_core::traits::ModuleEventListener;
use batchhost_core::{HostError, HostResult};

use crate::code_unit::CodeUnit;
use crate::context::{ModuleContext, ModuleServices};
use crate::control::{ModuleControlQueue, ModuleMap};
use crate::module::Module;
use crate::source::ModuleSource;

/// 业务应用名到模块名的反向索引
struct ApplicationIndex {
    generation: Option<u64>,
    module_by_application: HashMap<String, String>,
}

pub struct ModuleRegistry {
    config: RegistryConfig,
    context: Arc<ModuleContext>,
    modules: ModuleMap,
    application_index: RwLock<ApplicationIndex>,
    sources: RwLock<Vec<Arc<dyn ModuleSource>>>,
    control: Option<ModuleControlQueue>,
}

impl ModuleRegistry {
    /// 创建注册表；启用控制任务时会在当前tokio运行时中启动消费任务
    pub fn new(config: RegistryConfig, services: ModuleServices) -> Arc<Self> {
        let modules: ModuleMap = Arc::new(RwLock::new(BTreeMap::new()));
        let (control, sender) = if config.use_control_task {
            let (queue, sender) =
                ModuleControlQueue::spawn(config.control_queue_capacity, modules.clone());
            (Some(queue), Some(sender))
        } else {
            (None, None)
        };
        let context = Arc::new(ModuleContext::new(
            config.environment_id.clone(),
            services,
            sender,
        ));

        info!(
            environment_id = %config.environment_id,
            control_task = context.uses_control_task(),
            "模块注册表已创建"
        );
        Arc::new(Self {
            config,
            context,
            modules,
            application_index: RwLock::new(ApplicationIndex {
                generation: None,
                module_by_application: HashMap::new(),
            }),
            sources: RwLock::new(Vec::new()),
            control,
        })
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    pub fn context(&self) -> &Arc<ModuleContext> {
        &self.context
    }

    pub fn environment_id(&self) -> &str {
        self.context.environment_id()
    }

    /// 创建一个属于本注册表的模块（尚未注册）
    pub fn new_module(&self, name: impl Into<String>, code_unit: Arc<dyn CodeUnit>) -> Arc<Module> {
        Arc::new(Module::new(name, code_unit, self.context.clone()))
    }

    /// 注册模块
    ///
    /// 已存在同名的其他模块实例时不替换，新模块被标记为重名错误并返回false。
    pub async fn add_module(&self, module: Arc<Module>) -> bool {
        let mut modules = self.modules.write().await;
        if let Some(existing) = modules.get(module.name()) {
            if Arc::ptr_eq(existing, &module) {
                return true;
            }
            warn!(module = %module.name(), "已加载同名模块");
            module.add_module_error(
                &HostError::DuplicateModule {
                    name: module.name().to_string(),
                }
                .to_string(),
            );
            return false;
        }
        info!(module = %module.name(), artifact_id = %module.artifact_id(), "注册模块");
        modules.insert(module.name().to_string(), module);
        self.context.invalidate();
        true
    }

    /// 停止并移除模块，只有注册的正是该实例时才移除
    pub async fn unload_module(&self, module: &Arc<Module>) {
        module.unload().await;

        let mut modules = self.modules.write().await;
        let registered = modules
            .get(module.name())
            .is_some_and(|existing| Arc::ptr_eq(existing, module));
        if registered {
            modules.remove(module.name());
            self.context.invalidate();
            info!(module = %module.name(), "卸载模块");
        }
    }

    pub async fn get_module(&self, name: &str) -> Option<Arc<Module>> {
        self.modules.read().await.get(name).cloned()
    }

    pub async fn require_module(&self, name: &str) -> HostResult<Arc<Module>> {
        self.get_module(name)
            .await
            .ok_or_else(|| HostError::ModuleNotFound {
                name: name.to_string(),
            })
    }

    pub async fn modules(&self) -> Vec<Arc<Module>> {
        self.modules.read().await.values().cloned().collect()
    }

    pub async fn module_names(&self) -> Vec<String> {
        self.modules.read().await.keys().cloned().collect()
    }

    pub async fn module_infos(&self) -> Vec<ModuleInfo> {
        self.modules().await.iter().map(|module| module.info()).collect()
    }

    /// 已启动模块的集合，按名称排序
    pub async fn started_modules(&self) -> Vec<Arc<Module>> {
        self.modules()
            .await
            .into_iter()
            .filter(|module| module.is_started())
            .collect()
    }

    /// 业务应用所在的模块；名称可带 `:版本` 后缀，版本被忽略
    pub async fn module_for_business_application(&self, name: &str) -> Option<Arc<Module>> {
        let name = strip_version(name);
        let module_name = {
            let generation = self.context.generation();
            let index = self.application_index.read().await;
            if index.generation == Some(generation) {
                index.module_by_application.get(name).cloned()
            } else {
                drop(index);
                self.rebuild_application_index(generation)
                    .await
                    .get(name)
                    .cloned()
            }
        }?;
        self.get_module(&module_name).await
    }

    async fn rebuild_application_index(&self, generation: u64) -> HashMap<String, String> {
        let mut module_by_application = HashMap::new();
        for module in self.modules().await {
            for application in module.business_application_names() {
                module_by_application.insert(application, module.name().to_string());
            }
        }

        let mut index = self.application_index.write().await;
        index.generation = Some(generation);
        index.module_by_application = module_by_application.clone();
        module_by_application
    }

    pub async fn get_business_application(&self, name: &str) -> Option<Arc<BusinessApplication>> {
        let module = self.module_for_business_application(name).await?;
        module.business_application(strip_version(name))
    }

    pub async fn require_business_application(
        &self,
        name: &str,
    ) -> HostResult<Arc<BusinessApplication>> {
        self.get_business_application(name)
            .await
            .ok_or_else(|| HostError::BusinessApplicationNotFound {
                name: name.to_string(),
            })
    }

    /// 所有已启用模块的业务应用名称，忽略大小写排序
    pub async fn business_application_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .modules()
            .await
            .iter()
            .filter(|module| module.is_enabled())
            .flat_map(|module| module.business_application_names())
            .collect();
        names.sort_by_key(|name| name.to_lowercase());
        names
    }

    pub async fn start_module(&self, name: &str) -> HostResult<()> {
        self.require_module(name).await?.start().await
    }

    pub async fn stop_module(&self, name: &str) -> HostResult<()> {
        self.require_module(name).await?.stop().await
    }

    pub async fn restart_module(&self, name: &str) -> HostResult<()> {
        self.require_module(name).await?.restart().await
    }

    pub async fn enable_module(&self, name: &str) -> HostResult<()> {
        self.require_module(name).await?.enable().await
    }

    pub async fn disable_module(&self, name: &str) -> HostResult<()> {
        self.require_module(name).await?.disable().await
    }

    /// 通知监听器模块的用户组权限发生了变化
    pub async fn security_changed(&self, name: &str) -> HostResult<()> {
        let module = self.require_module(name).await?;
        self.context
            .emit(ModuleEvent::new(
                ModuleAction::SecurityChanged,
                module.name(),
                module.started_time(),
                module.business_application_names(),
            ))
            .await;
        Ok(())
    }

    pub async fn add_module_event_listener(&self, listener: Arc<dyn ModuleEventListener>) {
        self.context.add_listener(listener).await;
    }

    pub async fn remove_module_event_listener(&self, listener: &Arc<dyn ModuleEventListener>) {
        self.context.remove_listener(listener).await;
    }

    pub async fn add_module_source(&self, source: Arc<dyn ModuleSource>) {
        self.sources.write().await.push(source);
    }

    /// 依次刷新所有模块来源，单个来源失败不影响其他来源
    pub async fn refresh_modules(&self) {
        let sources = self.sources.read().await.clone();
        for source in sources {
            if let Err(e) = source.refresh(self).await {
                error!(source = %source.name(), "刷新模块来源失败: {}", e);
            }
        }
    }

    /// 按固定间隔刷新模块来源
    pub fn spawn_refresh_task(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let registry = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if registry.context.is_closed() {
                    break;
                }
                registry.refresh_modules().await;
            }
        })
    }

    /// 关闭注册表：不再通知监听器，停止控制任务并停止所有模块
    pub async fn shutdown(&self) {
        info!("关闭模块注册表");
        self.context.close();
        if let Some(control) = &self.control {
            control.stop().await;
        }
        for module in self.modules().await {
            module.unload().await;
        }
    }
}

fn strip_version(name: &str) -> &str {
    name.split_once(':').map_or(name, |(name, _)| name)
}
