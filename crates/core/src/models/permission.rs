use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// 资源权限中匹配任意值的通配符
pub const ALL: &str = "ALL";

fn all() -> String {
    ALL.to_string()
}

/// 用户组对资源的访问权限
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourcePermission {
    #[serde(default = "all")]
    pub resource_class: String,
    #[serde(default = "all")]
    pub resource_id: String,
    #[serde(default = "all")]
    pub action_name: String,
}

impl Default for ResourcePermission {
    fn default() -> Self {
        Self {
            resource_class: all(),
            resource_id: all(),
            action_name: all(),
        }
    }
}

impl ResourcePermission {
    pub fn new(
        resource_class: impl Into<String>,
        resource_id: impl Into<String>,
        action_name: impl Into<String>,
    ) -> Self {
        Self {
            resource_class: resource_class.into(),
            resource_id: resource_id.into(),
            action_name: action_name.into(),
        }
    }

    /// 对任意资源执行指定动作的权限
    pub fn action(action_name: impl Into<String>) -> Self {
        Self::new(ALL, ALL, action_name)
    }

    /// 每个字段相等或任一方为 `ALL` 时匹配
    pub fn can_access(&self, requested: &ResourcePermission) -> bool {
        equal_or_all(&requested.resource_class, &self.resource_class)
            && equal_or_all(&requested.resource_id, &self.resource_id)
            && equal_or_all(&requested.action_name, &self.action_name)
    }
}

fn equal_or_all(value1: &str, value2: &str) -> bool {
    value1 == value2 || value1 == ALL || value2 == ALL
}

/// 模块声明的用户组权限快照
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModulePermissions {
    pub module_name: String,
    pub permissions_by_group_name: BTreeMap<String, BTreeSet<ResourcePermission>>,
    pub group_names_to_delete: BTreeSet<String>,
}

impl ModulePermissions {
    pub fn new(module_name: impl Into<String>) -> Self {
        Self {
            module_name: module_name.into(),
            ..Self::default()
        }
    }

    pub fn has_group(&self, group_name: &str) -> bool {
        self.permissions_by_group_name.contains_key(group_name)
    }

    /// 任一所属组授予的权限覆盖请求的权限
    pub fn groups_can_access(
        &self,
        group_names: &BTreeSet<String>,
        requested: &ResourcePermission,
    ) -> bool {
        group_names.iter().any(|group_name| {
            self.permissions_by_group_name
                .get(group_name)
                .is_some_and(|granted| granted.iter().any(|p| p.can_access(requested)))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_matches_any_value() {
        let granted = ResourcePermission::new("map", ALL, "view");
        assert!(granted.can_access(&ResourcePermission::new("map", "42", "view")));
        assert!(!granted.can_access(&ResourcePermission::new("map", "42", "edit")));
        assert!(!granted.can_access(&ResourcePermission::new("layer", "42", "view")));
    }

    #[test]
    fn test_requested_all_matches() {
        let granted = ResourcePermission::new("map", "7", "edit");
        assert!(granted.can_access(&ResourcePermission::action("edit")));
    }

    #[test]
    fn test_groups_can_access() {
        let mut permissions = ModulePermissions::new("geo");
        permissions.permissions_by_group_name.insert(
            "ROLE_GEO_USER".into(),
            [ResourcePermission::action("run")].into(),
        );
        let groups: BTreeSet<String> = ["ROLE_GEO_USER".to_string()].into();

        assert!(permissions.groups_can_access(&groups, &ResourcePermission::action("run")));
        assert!(!permissions.groups_can_access(&groups, &ResourcePermission::action("edit")));
        assert!(!permissions.groups_can_access(&BTreeSet::new(), &ResourcePermission::action("run")));
    }

    #[test]
    fn test_missing_fields_default_to_all() {
        let permission: ResourcePermission =
            serde_json::from_str(r#"{"actionName":"view"}"#).unwrap();
        assert_eq!(permission.resource_class, ALL);
        assert_eq!(permission.resource_id, ALL);
        assert_eq!(permission.action_name, "view");
    }
}
