use async_trait::async_trait;
use tokio::sync::RwLock;

use batchhost_core::config::ConfiguredModule;
use batchhost_core::HostResult;

use super::{LoadedModules, ModuleDefinition, ModuleSource};
use crate::registry::ModuleRegistry;

/// 配置驱动的模块来源
pub struct ConfiguredModuleSource {
    modules: RwLock<Vec<ConfiguredModule>>,
    loaded: LoadedModules,
}

impl ConfiguredModuleSource {
    pub fn new(modules: Vec<ConfiguredModule>) -> Self {
        Self {
            modules: RwLock::new(modules),
            loaded: LoadedModules::default(),
        }
    }

    /// 替换配置的模块列表，下次刷新时生效
    pub async fn set_modules(&self, modules: Vec<ConfiguredModule>) {
        *self.modules.write().await = modules;
    }

    pub async fn module_names(&self) -> Vec<String> {
        self.loaded.names().await
    }
}

#[async_trait]
impl ModuleSource for ConfiguredModuleSource {
    fn name(&self) -> &str {
        "configured"
    }

    async fn refresh(&self, registry: &ModuleRegistry) -> HostResult<()> {
        let definitions = self
            .modules
            .read()
            .await
            .iter()
            .map(|module| ModuleDefinition {
                name: module.name.clone(),
                artifact: module.artifact.clone(),
                enabled: module.enabled,
            })
            .collect();
        self.loaded.synchronize(registry, definitions).await
    }
}
