use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::models::ModulePermissions;
use crate::HostResult;

/// 针对单个消费者的安全服务
#[async_trait]
pub trait SecurityService: Send + Sync {
    fn consumer_key(&self) -> &str;

    async fn can_access_resource(
        &self,
        resource_class: &str,
        resource_id: &str,
        action_name: &str,
    ) -> bool;

    async fn can_perform_action(&self, action_name: &str) -> bool;

    async fn is_in_group(&self, group_name: &str) -> bool;

    async fn user_attributes(&self) -> Map<String, Value>;
}

/// 按模块与消费者获取安全服务
#[async_trait]
pub trait SecurityServiceFactory: Send + Sync {
    async fn security_service(
        &self,
        module: Arc<ModulePermissions>,
        consumer_key: &str,
    ) -> HostResult<Arc<dyn SecurityService>>;
}
