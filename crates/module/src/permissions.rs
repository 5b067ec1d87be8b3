//! 模块用户组定义 `user-groups.json`

use serde::Deserialize;
use std::collections::BTreeSet;

use batchhost_core::models::{ModulePermissions, ResourcePermission};

/// 用户组定义资源名
pub const USER_GROUPS_RESOURCE: &str = "user-groups.json";

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UserGroupEntry {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    action: Option<String>,
    #[serde(default)]
    permissions: Vec<ResourcePermission>,
}

/// 解析模块的用户组定义
///
/// 组名统一转为大写。`action = "delete"` 只对 `ROLE_<模块名>` 前缀的组生效，
/// 其余带删除指令的条目按普通组创建。出错的条目被跳过，错误一并返回。
pub fn parse_user_groups(module_name: &str, data: &[u8]) -> (ModulePermissions, Vec<String>) {
    let mut permissions = ModulePermissions::new(module_name);
    let mut errors = Vec::new();

    let entries: Vec<serde_json::Value> = match serde_json::from_slice(data) {
        Ok(entries) => entries,
        Err(e) => {
            errors.push(format!("无法解析 {USER_GROUPS_RESOURCE}: {e}"));
            return (permissions, errors);
        }
    };

    let delete_prefix = format!("ROLE_{}", module_name.to_uppercase());
    for raw in entries {
        let entry: UserGroupEntry = match serde_json::from_value(raw.clone()) {
            Ok(entry) => entry,
            Err(e) => {
                errors.push(format!("无效的用户组定义 {raw}: {e}"));
                continue;
            }
        };

        let Some(group_name) = entry.name.as_deref().map(str::to_uppercase) else {
            errors.push(format!("用户组必须有名称: {raw}"));
            continue;
        };

        let delete = entry
            .action
            .as_deref()
            .is_some_and(|action| action.eq_ignore_ascii_case("delete"));

        let created = permissions.permissions_by_group_name.contains_key(&group_name);
        let deleted = permissions.group_names_to_delete.contains(&group_name);
        if (created && !delete) || (deleted && delete) {
            errors.push(format!("用户组名称必须唯一: {raw}"));
        } else if created || deleted {
            errors.push(format!("同一文件中不能既删除又创建用户组: {raw}"));
        } else if delete && group_name.starts_with(&delete_prefix) {
            permissions.group_names_to_delete.insert(group_name);
        } else {
            let granted: BTreeSet<ResourcePermission> = entry.permissions.into_iter().collect();
            permissions
                .permissions_by_group_name
                .insert(group_name, granted);
        }
    }

    (permissions, errors)
}
