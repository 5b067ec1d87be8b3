use std::fs;
use std::path::Path;
use std::sync::Arc;

use batchhost_core::config::{ConfiguredModule, RegistryConfig};
use batchhost_core::models::ModuleStatus;
use batchhost_module::{
    BuiltinPlugins, ConfiguredModuleSource, DirectoryModuleSource, ModuleRegistry, ModuleServices,
    PluginResponse,
};

const MANIFEST: &str = r#"
[[plugins]]
class = "WaitPlugin"
[[plugins.results]]
name = "waitTime"
type = "integer"
index = 1
"#;

fn registry() -> Arc<ModuleRegistry> {
    let mut plugins = BuiltinPlugins::new();
    plugins.register("WaitPlugin", |_: &batchhost_module::PluginRequest| {
        Ok(PluginResponse::default())
    });
    ModuleRegistry::new(
        RegistryConfig {
            use_control_task: false,
            ..RegistryConfig::default()
        },
        ModuleServices {
            builtin_plugins: plugins,
            ..ModuleServices::default()
        },
    )
}

fn write_module(dir: &Path, name: &str) {
    let module_dir = dir.join(name);
    fs::create_dir_all(&module_dir).unwrap();
    fs::write(module_dir.join("plugin.toml"), MANIFEST).unwrap();
}

#[tokio::test]
async fn test_directory_source_adds_and_removes_modules() {
    let dir = tempfile::tempdir().unwrap();
    write_module(dir.path(), "geo");
    write_module(dir.path(), "roads");
    fs::create_dir_all(dir.path().join("not-a-module")).unwrap();

    let registry = registry();
    let source = Arc::new(DirectoryModuleSource::new(dir.path()));
    registry.add_module_source(source.clone()).await;
    registry.refresh_modules().await;

    assert_eq!(registry.module_names().await, vec!["geo", "roads"]);
    assert_eq!(source.module_names().await, vec!["geo", "roads"]);
    let geo = registry.get_module("geo").await.unwrap();
    assert!(geo.is_started());

    fs::remove_dir_all(dir.path().join("roads")).unwrap();
    registry.refresh_modules().await;

    assert_eq!(registry.module_names().await, vec!["geo"]);
    let still_geo = registry.get_module("geo").await.unwrap();
    assert!(Arc::ptr_eq(&geo, &still_geo));
}

#[tokio::test]
async fn test_configured_source_reloads_changed_artifact() {
    let first = tempfile::tempdir().unwrap();
    let second = tempfile::tempdir().unwrap();
    write_module(first.path(), "geo");
    write_module(second.path(), "geo");

    let registry = registry();
    let source = Arc::new(ConfiguredModuleSource::new(vec![ConfiguredModule {
        name: "geo".into(),
        artifact: first.path().join("geo"),
        enabled: true,
    }]));
    registry.add_module_source(source.clone()).await;
    registry.refresh_modules().await;
    let original = registry.get_module("geo").await.unwrap();
    assert!(original.is_started());

    source
        .set_modules(vec![ConfiguredModule {
            name: "geo".into(),
            artifact: second.path().join("geo"),
            enabled: true,
        }])
        .await;
    registry.refresh_modules().await;

    let reloaded = registry.get_module("geo").await.unwrap();
    assert!(!Arc::ptr_eq(&original, &reloaded));
    assert!(reloaded.is_started());
    assert!(!original.is_started());
    assert!(reloaded
        .artifact_id()
        .starts_with(&second.path().join("geo").display().to_string()));
}

#[tokio::test]
async fn test_configured_source_applies_enabled_flag() {
    let dir = tempfile::tempdir().unwrap();
    write_module(dir.path(), "geo");

    let registry = registry();
    let source = Arc::new(ConfiguredModuleSource::new(vec![ConfiguredModule {
        name: "geo".into(),
        artifact: dir.path().join("geo"),
        enabled: false,
    }]));
    registry.add_module_source(source.clone()).await;
    registry.refresh_modules().await;

    let module = registry.get_module("geo").await.unwrap();
    assert_eq!(module.status(), ModuleStatus::Disabled);
    assert!(!module.is_started());

    source
        .set_modules(vec![ConfiguredModule {
            name: "geo".into(),
            artifact: dir.path().join("geo"),
            enabled: true,
        }])
        .await;
    registry.refresh_modules().await;
    assert!(module.is_started());
}

#[tokio::test]
async fn test_missing_artifact_is_skipped() {
    let registry = registry();
    let source = Arc::new(ConfiguredModuleSource::new(vec![ConfiguredModule {
        name: "ghost".into(),
        artifact: "/nonexistent/ghost".into(),
        enabled: true,
    }]));
    registry.add_module_source(source).await;
    registry.refresh_modules().await;

    assert!(registry.get_module("ghost").await.is_none());
}
