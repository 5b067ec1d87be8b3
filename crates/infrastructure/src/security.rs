//! 基于用户组的安全服务
//!
//! 消费者所属的用户组在创建安全服务时从 [`UserGroupStore`] 读取一次，
//! 之后的判定结果按参数缓存。模块停止或安全配置变化时，工厂丢弃该模块的全部缓存。

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::RwLock;
use tracing::debug;

use batchhost_core::models::permission::ALL;
use batchhost_core::models::{ModuleAction, ModuleEvent, ModulePermissions, ResourcePermission};
use batchhost_core::traits::{ModuleEventListener, SecurityService, SecurityServiceFactory, UserGroupStore};
use batchhost_core::HostResult;

/// 单个模块、单个消费者的安全服务
#[derive(Debug)]
pub struct GroupSecurityService {
    consumer_key: String,
    permissions: Arc<ModulePermissions>,
    group_names: BTreeSet<String>,
    attributes: Map<String, Value>,
    decisions: Mutex<HashMap<ResourcePermission, bool>>,
}

impl GroupSecurityService {
    pub fn new(
        consumer_key: impl Into<String>,
        permissions: Arc<ModulePermissions>,
        group_names: BTreeSet<String>,
        attributes: Map<String, Value>,
    ) -> Self {
        Self {
            consumer_key: consumer_key.into(),
            permissions,
            group_names,
            attributes,
            decisions: Mutex::new(HashMap::new()),
        }
    }

    pub fn module_name(&self) -> &str {
        &self.permissions.module_name
    }

    fn decide(&self, requested: ResourcePermission) -> bool {
        let mut decisions = self.decisions.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(decision) = decisions.get(&requested) {
            return *decision;
        }
        let decision = self.permissions.groups_can_access(&self.group_names, &requested);
        decisions.insert(requested, decision);
        decision
    }
}

#[async_trait]
impl SecurityService for GroupSecurityService {
    fn consumer_key(&self) -> &str {
        &self.consumer_key
    }

    async fn can_access_resource(&self, resource_class: &str, resource_id: &str, action_name: &str) -> bool {
        self.decide(ResourcePermission::new(resource_class, resource_id, action_name))
    }

    async fn can_perform_action(&self, action_name: &str) -> bool {
        self.decide(ResourcePermission::new(ALL, ALL, action_name))
    }

    /// 组名匹配或带 `ROLE_` 前缀匹配均视为成员
    async fn is_in_group(&self, group_name: &str) -> bool {
        let group_name = group_name.to_uppercase();
        self.group_names.iter().any(|name| {
            *name == group_name || group_name.strip_prefix("ROLE_") == Some(name.as_str())
        })
    }

    async fn user_attributes(&self) -> Map<String, Value> {
        self.attributes.clone()
    }
}

/// 按（模块，消费者）缓存安全服务的工厂
pub struct CachingSecurityServiceFactory {
    user_group_store: Arc<dyn UserGroupStore>,
    services: RwLock<HashMap<(String, String), Arc<GroupSecurityService>>>,
}

impl CachingSecurityServiceFactory {
    pub fn new(user_group_store: Arc<dyn UserGroupStore>) -> Self {
        Self {
            user_group_store,
            services: RwLock::new(HashMap::new()),
        }
    }

    /// 丢弃指定模块的缓存
    pub async fn clear_module(&self, module_name: &str) {
        let mut services = self.services.write().await;
        let before = services.len();
        services.retain(|(name, _), _| name != module_name);
        debug!(module = %module_name, removed = before - services.len(), "清除安全服务缓存");
    }

    pub async fn cached_count(&self) -> usize {
        self.services.read().await.len()
    }
}

#[async_trait]
impl SecurityServiceFactory for CachingSecurityServiceFactory {
    async fn security_service(
        &self,
        module: Arc<ModulePermissions>,
        consumer_key: &str,
    ) -> HostResult<Arc<dyn SecurityService>> {
        let key = (module.module_name.clone(), consumer_key.to_string());
        if let Some(service) = self.services.read().await.get(&key) {
            // 模块权限快照变化后旧缓存失效
            if Arc::ptr_eq(&service.permissions, &module) {
                return Ok(service.clone());
            }
        }

        let group_names = self.user_group_store.groups_for_consumer(consumer_key).await?;
        let attributes = self.user_group_store.user_attributes(consumer_key).await?;
        let service = Arc::new(GroupSecurityService::new(consumer_key, module, group_names, attributes));
        self.services.write().await.insert(key, service.clone());
        Ok(service)
    }
}

#[async_trait]
impl ModuleEventListener for CachingSecurityServiceFactory {
    async fn module_changed(&self, event: &ModuleEvent) -> HostResult<()> {
        if matches!(event.action, ModuleAction::Stop | ModuleAction::SecurityChanged) {
            self.clear_module(&event.module_name).await;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::InMemoryUserGroupStore;
    use std::collections::BTreeMap;

    fn permissions() -> Arc<ModulePermissions> {
        let mut permissions = ModulePermissions::new("geo");
        permissions.permissions_by_group_name.insert(
            "ROLE_GEO_USER".into(),
            BTreeSet::from([
                ResourcePermission::action("run"),
                ResourcePermission::new("map", "42", "view"),
            ]),
        );
        Arc::new(permissions)
    }

    async fn factory() -> (Arc<InMemoryUserGroupStore>, CachingSecurityServiceFactory) {
        let store = Arc::new(InMemoryUserGroupStore::new());
        store.add_member("alice", "ROLE_GEO_USER").await;
        let mut attributes = Map::new();
        attributes.insert("email".into(), Value::from("alice@example.com"));
        store.set_user_attributes("alice", attributes).await;
        (store.clone(), CachingSecurityServiceFactory::new(store))
    }

    #[tokio::test]
    async fn test_group_permissions() {
        let (_, factory) = factory().await;
        let service = factory.security_service(permissions(), "alice").await.unwrap();

        assert_eq!(service.consumer_key(), "alice");
        assert!(service.can_perform_action("run").await);
        assert!(!service.can_perform_action("delete").await);
        assert!(service.can_access_resource("map", "42", "view").await);
        assert!(!service.can_access_resource("map", "43", "view").await);
        assert!(service.is_in_group("ROLE_GEO_USER").await);
        assert!(!service.is_in_group("ROLE_GEO_ADMIN").await);
        assert_eq!(service.user_attributes().await["email"], "alice@example.com");

        let bob = factory.security_service(permissions(), "bob").await.unwrap();
        assert!(!bob.can_perform_action("run").await);
        assert!(bob.user_attributes().await.is_empty());
    }

    #[tokio::test]
    async fn test_cache_cleared_on_stop_and_security_changed() {
        let (_, factory) = factory().await;
        let module = permissions();
        let first = factory.security_service(module.clone(), "alice").await.unwrap();
        let second = factory.security_service(module.clone(), "alice").await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(factory.cached_count().await, 1);

        factory
            .module_changed(&ModuleEvent::new(ModuleAction::Start, "geo", 1, vec![]))
            .await
            .unwrap();
        assert_eq!(factory.cached_count().await, 1);

        factory
            .module_changed(&ModuleEvent::new(ModuleAction::SecurityChanged, "geo", 1, vec![]))
            .await
            .unwrap();
        assert_eq!(factory.cached_count().await, 0);

        factory.security_service(module, "alice").await.unwrap();
        factory
            .module_changed(&ModuleEvent::new(ModuleAction::Stop, "geo", 1, vec![]))
            .await
            .unwrap();
        assert_eq!(factory.cached_count().await, 0);
    }

    #[tokio::test]
    async fn test_membership_change_visible_after_clear() {
        let (store, factory) = factory().await;
        let module = permissions();
        store.add_member("bob", "ROLE_GEO_USER").await;
        let bob = factory.security_service(module.clone(), "bob").await.unwrap();
        assert!(bob.can_perform_action("run").await);

        let mut groups = BTreeMap::new();
        groups.insert("ROLE_GEO_USER".to_string(), BTreeSet::new());
        store
            .sync_module_groups("geo", &groups, &BTreeSet::from(["ROLE_GEO_USER".to_string()]))
            .await
            .unwrap();
        factory.clear_module("geo").await;

        let bob = factory.security_service(module, "bob").await.unwrap();
        assert!(!bob.can_perform_action("run").await);
    }
}
