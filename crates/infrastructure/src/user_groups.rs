use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::RwLock;
use tracing::info;

use batchhost_core::models::ResourcePermission;
use batchhost_core::traits::UserGroupStore;
use batchhost_core::HostResult;

#[derive(Debug, Clone)]
struct UserGroupRecord {
    module_name: String,
    permissions: BTreeSet<ResourcePermission>,
}

/// 内存用户组存储
#[derive(Debug, Default)]
pub struct InMemoryUserGroupStore {
    groups: RwLock<BTreeMap<String, UserGroupRecord>>,
    members: RwLock<BTreeMap<String, BTreeSet<String>>>,
    attributes: RwLock<BTreeMap<String, Map<String, Value>>>,
}

impl InMemoryUserGroupStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 把消费者加入用户组，组名统一为大写
    pub async fn add_member(&self, consumer_key: &str, group_name: &str) {
        self.members
            .write()
            .await
            .entry(consumer_key.to_string())
            .or_default()
            .insert(group_name.to_uppercase());
    }

    pub async fn set_user_attributes(&self, consumer_key: &str, attributes: Map<String, Value>) {
        self.attributes
            .write()
            .await
            .insert(consumer_key.to_string(), attributes);
    }

    pub async fn group_names(&self) -> BTreeSet<String> {
        self.groups.read().await.keys().cloned().collect()
    }

    pub async fn group_permissions(&self, group_name: &str) -> Option<BTreeSet<ResourcePermission>> {
        self.groups
            .read()
            .await
            .get(group_name)
            .map(|group| group.permissions.clone())
    }

    pub async fn group_module(&self, group_name: &str) -> Option<String> {
        self.groups
            .read()
            .await
            .get(group_name)
            .map(|group| group.module_name.clone())
    }
}

#[async_trait]
impl UserGroupStore for InMemoryUserGroupStore {
    async fn sync_module_groups(
        &self,
        module_name: &str,
        permissions_by_group_name: &BTreeMap<String, BTreeSet<ResourcePermission>>,
        group_names_to_delete: &BTreeSet<String>,
    ) -> HostResult<()> {
        let mut groups = self.groups.write().await;
        for (group_name, permissions) in permissions_by_group_name {
            let group = groups
                .entry(group_name.clone())
                .or_insert_with(|| UserGroupRecord {
                    module_name: module_name.to_string(),
                    permissions: BTreeSet::new(),
                });
            group.permissions.extend(permissions.iter().cloned());
        }

        if !group_names_to_delete.is_empty() {
            for group_name in group_names_to_delete {
                if groups.remove(group_name).is_some() {
                    info!(module = %module_name, group = %group_name, "删除用户组");
                }
            }
            let mut members = self.members.write().await;
            for member_groups in members.values_mut() {
                member_groups.retain(|group_name| !group_names_to_delete.contains(group_name));
            }
        }
        Ok(())
    }

    async fn groups_for_consumer(&self, consumer_key: &str) -> HostResult<BTreeSet<String>> {
        Ok(self
            .members
            .read()
            .await
            .get(consumer_key)
            .cloned()
            .unwrap_or_default())
    }

    async fn user_attributes(&self, consumer_key: &str) -> HostResult<Map<String, Value>> {
        Ok(self
            .attributes
            .read()
            .await
            .get(consumer_key)
            .cloned()
            .unwrap_or_default())
    }
}
