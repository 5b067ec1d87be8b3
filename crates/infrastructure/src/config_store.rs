use std::collections::BTreeMap;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;

use batchhost_core::traits::ConfigPropertyStore;
use batchhost_core::HostResult;

type PropertyKey = (String, String, String);

/// 内存配置属性存储，按（环境，模块，组件）索引
#[derive(Debug, Default)]
pub struct InMemoryConfigPropertyStore {
    properties: RwLock<BTreeMap<PropertyKey, BTreeMap<String, Value>>>,
}

impl InMemoryConfigPropertyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_property(
        &self,
        environment_name: &str,
        module_name: &str,
        component_name: &str,
        name: &str,
        value: Value,
    ) {
        self.properties
            .write()
            .await
            .entry(key(environment_name, module_name, component_name))
            .or_default()
            .insert(name.to_string(), value);
    }

    pub async fn remove_property(
        &self,
        environment_name: &str,
        module_name: &str,
        component_name: &str,
        name: &str,
    ) -> Option<Value> {
        self.properties
            .write()
            .await
            .get_mut(&key(environment_name, module_name, component_name))
            .and_then(|properties| properties.remove(name))
    }
}

fn key(environment_name: &str, module_name: &str, component_name: &str) -> PropertyKey {
    (
        environment_name.to_string(),
        module_name.to_string(),
        component_name.to_string(),
    )
}

#[async_trait]
impl ConfigPropertyStore for InMemoryConfigPropertyStore {
    async fn properties(
        &self,
        environment_name: &str,
        module_name: &str,
        component_name: &str,
    ) -> HostResult<BTreeMap<String, Value>> {
        Ok(self
            .properties
            .read()
            .await
            .get(&key(environment_name, module_name, component_name))
            .cloned()
            .unwrap_or_default())
    }

    async fn component_properties(
        &self,
        module_name: &str,
        component_name: &str,
    ) -> HostResult<BTreeMap<String, BTreeMap<String, Value>>> {
        Ok(self
            .properties
            .read()
            .await
            .iter()
            .filter(|((_, module, component), properties)| {
                module == module_name && component == component_name && !properties.is_empty()
            })
            .map(|((environment, _, _), properties)| (environment.clone(), properties.clone()))
            .collect())
    }

    async fn save_property(
        &self,
        environment_name: &str,
        module_name: &str,
        component_name: &str,
        name: &str,
        value: Value,
    ) -> HostResult<()> {
        self.set_property(environment_name, module_name, component_name, name, value)
            .await;
        Ok(())
    }

    async fn delete_property(
        &self,
        environment_name: &str,
        module_name: &str,
        component_name: &str,
        name: &str,
    ) -> HostResult<Option<Value>> {
        Ok(self
            .remove_property(environment_name, module_name, component_name, name)
            .await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_environment_overlays_default() {
        let store = InMemoryConfigPropertyStore::new();
        store.set_property("DEFAULT", "geo", "GLOBAL", "a", json!(1)).await;
        store.set_property("DEFAULT", "geo", "GLOBAL", "b", json!(2)).await;
        store.set_property("prod", "geo", "GLOBAL", "b", json!(3)).await;

        let properties = store.effective_properties("prod", "geo", "GLOBAL").await.unwrap();
        assert_eq!(properties["a"], json!(1));
        assert_eq!(properties["b"], json!(3));

        let other = store.effective_properties("prod", "geo", "APP_WAIT").await.unwrap();
        assert!(other.is_empty());
    }

    #[tokio::test]
    async fn test_remove_property() {
        let store = InMemoryConfigPropertyStore::new();
        store.set_property("DEFAULT", "geo", "GLOBAL", "a", json!(1)).await;
        assert_eq!(
            store.remove_property("DEFAULT", "geo", "GLOBAL", "a").await,
            Some(json!(1))
        );
        assert!(store
            .properties("DEFAULT", "geo", "GLOBAL")
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_component_properties_by_environment() {
        let store = InMemoryConfigPropertyStore::new();
        store.save_property("DEFAULT", "geo", "GLOBAL", "a", json!(1)).await.unwrap();
        store.save_property("prod", "geo", "GLOBAL", "a", json!(2)).await.unwrap();
        store.save_property("prod", "geo", "APP_WAIT", "b", json!(3)).await.unwrap();
        store.save_property("prod", "road", "GLOBAL", "c", json!(4)).await.unwrap();
        store.delete_property("DEFAULT", "geo", "GLOBAL", "a").await.unwrap();

        let properties = store.component_properties("geo", "GLOBAL").await.unwrap();
        assert_eq!(properties.len(), 1);
        assert_eq!(properties["prod"]["a"], json!(2));
    }
}
