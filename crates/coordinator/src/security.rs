//! Worker安全委托
//!
//! Worker上运行的插件没有用户组数据，安全判定都回到主节点完成。
//! 模块未知时返回 `None`，由调用方回复不带结果字段的消息。

use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::debug;

use batchhost_core::models::ModulePermissions;
use batchhost_core::traits::{SecurityService, SecurityServiceFactory};
use batchhost_core::HostResult;
use batchhost_module::ModuleRegistry;

#[derive(Clone)]
pub struct SecurityProxy {
    registry: Arc<ModuleRegistry>,
    factory: Arc<dyn SecurityServiceFactory>,
}

impl SecurityProxy {
    pub fn new(registry: Arc<ModuleRegistry>, factory: Arc<dyn SecurityServiceFactory>) -> Self {
        Self { registry, factory }
    }

    /// 模块与消费者对应的安全服务；未启动的模块使用空权限
    pub async fn security_service(
        &self,
        module_name: &str,
        consumer_key: &str,
    ) -> HostResult<Option<Arc<dyn SecurityService>>> {
        let Some(module) = self.registry.get_module(module_name).await else {
            debug!(module = %module_name, "安全委托请求的模块不存在");
            return Ok(None);
        };
        let permissions = module
            .permissions()
            .unwrap_or_else(|| Arc::new(ModulePermissions::new(module_name)));
        let service = self.factory.security_service(permissions, consumer_key).await?;
        Ok(Some(service))
    }

    pub async fn can_access_resource(
        &self,
        module_name: &str,
        consumer_key: &str,
        resource_class: &str,
        resource_id: &str,
        action_name: &str,
    ) -> HostResult<Option<bool>> {
        match self.security_service(module_name, consumer_key).await? {
            Some(service) => Ok(Some(
                service
                    .can_access_resource(resource_class, resource_id, action_name)
                    .await,
            )),
            None => Ok(None),
        }
    }

    pub async fn can_perform_action(
        &self,
        module_name: &str,
        consumer_key: &str,
        action_name: &str,
    ) -> HostResult<Option<bool>> {
        match self.security_service(module_name, consumer_key).await? {
            Some(service) => Ok(Some(service.can_perform_action(action_name).await)),
            None => Ok(None),
        }
    }

    pub async fn is_in_group(
        &self,
        module_name: &str,
        consumer_key: &str,
        group_name: &str,
    ) -> HostResult<Option<bool>> {
        match self.security_service(module_name, consumer_key).await? {
            Some(service) => Ok(Some(service.is_in_group(group_name).await)),
            None => Ok(None),
        }
    }

    pub async fn user_attributes(
        &self,
        module_name: &str,
        consumer_key: &str,
    ) -> HostResult<Option<Map<String, Value>>> {
        match self.security_service(module_name, consumer_key).await? {
            Some(service) => Ok(Some(service.user_attributes().await)),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use batchhost_core::config::RegistryConfig;
    use batchhost_module::{MemoryCodeUnit, ModuleServices};
    use mockall::mock;

    mock! {
        Security {}

        #[async_trait]
        impl SecurityService for Security {
            fn consumer_key(&self) -> &str;
            async fn can_access_resource(&self, resource_class: &str, resource_id: &str, action_name: &str) -> bool;
            async fn can_perform_action(&self, action_name: &str) -> bool;
            async fn is_in_group(&self, group_name: &str) -> bool;
            async fn user_attributes(&self) -> Map<String, Value>;
        }
    }

    mock! {
        Factory {}

        #[async_trait]
        impl SecurityServiceFactory for Factory {
            async fn security_service(
                &self,
                module: Arc<ModulePermissions>,
                consumer_key: &str,
            ) -> HostResult<Arc<dyn SecurityService>>;
        }
    }

    async fn registry_with_geo() -> Arc<ModuleRegistry> {
        let registry = ModuleRegistry::new(
            RegistryConfig {
                use_control_task: false,
                ..RegistryConfig::default()
            },
            ModuleServices::default(),
        );
        let module = registry.new_module("geo", Arc::new(MemoryCodeUnit::new("geo@1")));
        registry.add_module(module).await;
        registry
    }

    #[tokio::test]
    async fn test_unknown_module_returns_none() {
        let mut factory = MockFactory::new();
        factory.expect_security_service().never();
        let proxy = SecurityProxy::new(registry_with_geo().await, Arc::new(factory));

        assert_eq!(
            proxy.can_perform_action("missing", "alice", "run").await.unwrap(),
            None
        );
        assert!(proxy.user_attributes("missing", "alice").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_delegates_to_security_service() {
        let mut factory = MockFactory::new();
        factory
            .expect_security_service()
            .withf(|module, consumer_key| module.module_name == "geo" && consumer_key == "alice")
            .returning(|_, _| {
                let mut service = MockSecurity::new();
                service
                    .expect_can_access_resource()
                    .returning(|class, _, action| class == "map" && action == "view");
                service
                    .expect_is_in_group()
                    .returning(|group_name| group_name == "ROLE_GEO_USER");
                service.expect_can_perform_action().returning(|_| false);
                Ok(Arc::new(service) as Arc<dyn SecurityService>)
            });
        let proxy = SecurityProxy::new(registry_with_geo().await, Arc::new(factory));

        assert_eq!(
            proxy
                .can_access_resource("geo", "alice", "map", "1", "view")
                .await
                .unwrap(),
            Some(true)
        );
        assert_eq!(
            proxy.is_in_group("geo", "alice", "ROLE_GEO_USER").await.unwrap(),
            Some(true)
        );
        assert_eq!(
            proxy.can_perform_action("geo", "alice", "run").await.unwrap(),
            Some(false)
        );
    }
}
