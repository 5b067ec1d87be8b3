use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use serde_json::Value;

use crate::models::ResourcePermission;
use crate::HostResult;

/// 所有环境共享的配置属性环境名
pub const DEFAULT_ENVIRONMENT: &str = "DEFAULT";

/// 模块配置属性存储
#[async_trait]
pub trait ConfigPropertyStore: Send + Sync {
    /// 指定环境、模块、组件下的属性
    async fn properties(
        &self,
        environment_name: &str,
        module_name: &str,
        component_name: &str,
    ) -> HostResult<BTreeMap<String, Value>>;

    /// 模块组件在所有环境下的属性，按环境名分组
    async fn component_properties(
        &self,
        module_name: &str,
        component_name: &str,
    ) -> HostResult<BTreeMap<String, BTreeMap<String, Value>>>;

    /// 写入属性，已存在时覆盖
    async fn save_property(
        &self,
        environment_name: &str,
        module_name: &str,
        component_name: &str,
        name: &str,
        value: Value,
    ) -> HostResult<()>;

    /// 删除属性，返回被删除的值
    async fn delete_property(
        &self,
        environment_name: &str,
        module_name: &str,
        component_name: &str,
        name: &str,
    ) -> HostResult<Option<Value>>;

    /// `DEFAULT` 环境属性叠加指定环境属性
    async fn effective_properties(
        &self,
        environment_name: &str,
        module_name: &str,
        component_name: &str,
    ) -> HostResult<BTreeMap<String, Value>> {
        let mut properties = self
            .properties(DEFAULT_ENVIRONMENT, module_name, component_name)
            .await?;
        if environment_name != DEFAULT_ENVIRONMENT {
            properties.extend(
                self.properties(environment_name, module_name, component_name)
                    .await?,
            );
        }
        Ok(properties)
    }
}

/// 用户组与权限存储
#[async_trait]
pub trait UserGroupStore: Send + Sync {
    /// 同步模块声明的用户组：创建缺失的组和权限，删除标记为删除的组
    async fn sync_module_groups(
        &self,
        module_name: &str,
        permissions_by_group_name: &BTreeMap<String, BTreeSet<ResourcePermission>>,
        group_names_to_delete: &BTreeSet<String>,
    ) -> HostResult<()>;

    /// 消费者所属的用户组
    async fn groups_for_consumer(&self, consumer_key: &str) -> HostResult<BTreeSet<String>>;

    /// 消费者的用户属性
    async fn user_attributes(&self, consumer_key: &str)
        -> HostResult<serde_json::Map<String, Value>>;
}
