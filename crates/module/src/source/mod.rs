//! 模块来源
//!
//! 来源给出期望加载的模块集合，刷新时与已加载的模块比较：
//! 新模块注册并启用/禁用，消失的模块卸载，构件标识变化的模块先卸载再重新加载。

mod configured;
mod directory;

pub use configured::ConfiguredModuleSource;
pub use directory::DirectoryModuleSource;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{error, info};

use batchhost_core::HostResult;

use crate::code_unit::{CodeUnit, DirectoryCodeUnit};
use crate::module::Module;
use crate::registry::ModuleRegistry;

#[async_trait]
pub trait ModuleSource: Send + Sync {
    fn name(&self) -> &str;

    async fn refresh(&self, registry: &ModuleRegistry) -> HostResult<()>;
}

/// 来源期望加载的模块
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleDefinition {
    pub name: String,
    pub artifact: PathBuf,
    pub enabled: bool,
}

/// 来源加载过的模块，按名称索引
#[derive(Default)]
pub(crate) struct LoadedModules {
    modules: Mutex<BTreeMap<String, Arc<Module>>>,
}

impl LoadedModules {
    /// 将期望的模块集合同步到注册表
    pub(crate) async fn synchronize(
        &self,
        registry: &ModuleRegistry,
        definitions: Vec<ModuleDefinition>,
    ) -> HostResult<()> {
        let mut loaded = self.modules.lock().await;

        let removed: Vec<String> = loaded
            .keys()
            .filter(|name| !definitions.iter().any(|definition| &definition.name == *name))
            .cloned()
            .collect();
        for name in removed {
            if let Some(module) = loaded.remove(&name) {
                info!(module = %name, "模块已从来源中移除");
                registry.unload_module(&module).await;
            }
        }

        for definition in definitions {
            let code_unit = match DirectoryCodeUnit::open(
                &definition.artifact,
                &registry.config().excluded_artifacts,
            ) {
                Ok(code_unit) => Arc::new(code_unit),
                Err(e) => {
                    error!(module = %definition.name, artifact = %definition.artifact.display(), "无法打开模块代码单元: {}", e);
                    continue;
                }
            };

            if let Some(existing) = loaded.get(&definition.name).cloned() {
                if existing.artifact_id() == code_unit.artifact_id() {
                    if existing.is_enabled() != definition.enabled {
                        set_enabled(&existing, definition.enabled).await?;
                    }
                    continue;
                }
                info!(module = %definition.name, "模块构件已变化，重新加载");
                loaded.remove(&definition.name);
                registry.unload_module(&existing).await;
            }

            let module = registry.new_module(&definition.name, code_unit);
            if registry.add_module(module.clone()).await {
                set_enabled(&module, definition.enabled).await?;
                loaded.insert(definition.name, module);
            }
        }
        Ok(())
    }

    pub(crate) async fn names(&self) -> Vec<String> {
        self.modules.lock().await.keys().cloned().collect()
    }
}

async fn set_enabled(module: &Module, enabled: bool) -> HostResult<()> {
    if enabled {
        module.enable().await
    } else {
        module.disable().await
    }
}
