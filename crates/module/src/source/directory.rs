use std::fs;
use std::path::PathBuf;

use async_trait::async_trait;
use tracing::debug;

use batchhost_core::HostResult;

use super::{LoadedModules, ModuleDefinition, ModuleSource};
use crate::manifest::PLUGIN_MANIFEST;
use crate::registry::ModuleRegistry;

/// 扫描目录的模块来源：每个包含 `plugin.toml` 的子目录是一个同名模块
pub struct DirectoryModuleSource {
    directory: PathBuf,
    loaded: LoadedModules,
}

impl DirectoryModuleSource {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
            loaded: LoadedModules::default(),
        }
    }

    pub async fn module_names(&self) -> Vec<String> {
        self.loaded.names().await
    }

    fn scan(&self) -> HostResult<Vec<ModuleDefinition>> {
        let mut definitions = Vec::new();
        for entry in fs::read_dir(&self.directory)? {
            let path = entry?.path();
            if !path.is_dir() || !path.join(PLUGIN_MANIFEST).is_file() {
                continue;
            }
            if let Some(name) = path.file_name().and_then(|name| name.to_str()) {
                definitions.push(ModuleDefinition {
                    name: name.to_string(),
                    artifact: path.clone(),
                    enabled: true,
                });
            }
        }
        definitions.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(definitions)
    }
}

#[async_trait]
impl ModuleSource for DirectoryModuleSource {
    fn name(&self) -> &str {
        "directory"
    }

    async fn refresh(&self, registry: &ModuleRegistry) -> HostResult<()> {
        let definitions = self.scan()?;
        debug!(
            directory = %self.directory.display(),
            modules = definitions.len(),
            "扫描模块目录"
        );
        self.loaded.synchronize(registry, definitions).await
    }
}
