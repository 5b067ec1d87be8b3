use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

use super::module::ModuleAction;
use super::permission::ALL;

fn all() -> String {
    ALL.to_string()
}

/// Worker发往主节点的会话消息，按 `type` 字段区分
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum WorkerMessage {
    /// Worker当前正在执行的执行组
    ExecutingGroupIds { executing_group_ids: Vec<String> },
    /// Worker主动放弃的执行组
    FailedGroupId { group_id: String },
    ModuleLoading {
        module_name: String,
        #[serde(default)]
        module_time: i64,
    },
    #[serde(alias = "moduleLoaded")]
    ModuleStarted {
        module_name: String,
        #[serde(default)]
        module_time: i64,
    },
    ModuleStartFailed {
        module_name: String,
        #[serde(default)]
        module_error: Option<String>,
    },
    ModuleStopped { module_name: String },
    ModuleDisabled { module_name: String },
    ModuleConfigLoad {
        message_id: String,
        module_name: String,
        #[serde(default)]
        environment_name: Option<String>,
        #[serde(default)]
        component_name: Option<String>,
    },
    SecurityCanAccessResource {
        message_id: String,
        module_name: String,
        consumer_key: String,
        #[serde(default = "all")]
        resource_class: String,
        #[serde(default = "all")]
        resource_id: String,
        #[serde(default = "all")]
        action_name: String,
    },
    SecurityCanPerformAction {
        message_id: String,
        module_name: String,
        consumer_key: String,
        action_name: String,
    },
    SecurityIsMemberOfGroup {
        message_id: String,
        module_name: String,
        consumer_key: String,
        group_name: String,
    },
    SecurityUserAttributes {
        message_id: String,
        module_name: String,
        consumer_key: String,
    },
    #[serde(other)]
    Unknown,
}

/// 主节点发往Worker的会话消息
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum MasterMessage {
    /// 模块生命周期推送，无需确认
    ModuleChanged {
        action: ModuleAction,
        module_name: String,
        module_time: i64,
    },
    ModuleConfig {
        message_id: String,
        properties: BTreeMap<String, Value>,
    },
    /// 安全委托调用的结果，模块未知时不包含结果字段
    SecurityResult {
        message_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        has_access: Option<bool>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        member_of_group: Option<bool>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        attributes: Option<Map<String, Value>>,
    },
    CancelGroup { batch_job_id: String, group_id: String },
}

impl MasterMessage {
    pub fn security_result(message_id: impl Into<String>) -> Self {
        MasterMessage::SecurityResult {
            message_id: message_id.into(),
            has_access: None,
            member_of_group: None,
            attributes: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_executing_group_ids() {
        let message: WorkerMessage = serde_json::from_str(
            r#"{"type":"executingGroupIds","executingGroupIds":["J1-1-1","J2-4-2"]}"#,
        )
        .unwrap();
        assert_eq!(
            message,
            WorkerMessage::ExecutingGroupIds {
                executing_group_ids: vec!["J1-1-1".into(), "J2-4-2".into()]
            }
        );
    }

    #[test]
    fn test_module_loaded_alias() {
        let message: WorkerMessage =
            serde_json::from_str(r#"{"type":"moduleLoaded","moduleName":"geo","moduleTime":7}"#)
                .unwrap();
        assert_eq!(
            message,
            WorkerMessage::ModuleStarted {
                module_name: "geo".into(),
                module_time: 7
            }
        );
    }

    #[test]
    fn test_unknown_type_parses() {
        let message: WorkerMessage =
            serde_json::from_str(r#"{"type":"somethingElse","x":1}"#).unwrap();
        assert_eq!(message, WorkerMessage::Unknown);
    }

    #[test]
    fn test_security_defaults_to_all() {
        let message: WorkerMessage = serde_json::from_str(
            r#"{"type":"securityCanAccessResource","messageId":"1","moduleName":"geo","consumerKey":"c","resourceClass":"map"}"#,
        )
        .unwrap();
        match message {
            WorkerMessage::SecurityCanAccessResource {
                resource_id,
                action_name,
                ..
            } => {
                assert_eq!(resource_id, ALL);
                assert_eq!(action_name, ALL);
            }
            other => panic!("unexpected message {other:?}"),
        }
    }

    #[test]
    fn test_security_result_omits_missing_fields() {
        let json = serde_json::to_value(MasterMessage::security_result("5")).unwrap();
        assert_eq!(json["type"], "securityResult");
        assert_eq!(json["messageId"], "5");
        assert!(json.get("hasAccess").is_none());
    }

    #[test]
    fn test_module_changed_shape() {
        let json = serde_json::to_value(MasterMessage::ModuleChanged {
            action: ModuleAction::Start,
            module_name: "geo".into(),
            module_time: 12,
        })
        .unwrap();
        assert_eq!(json["type"], "moduleChanged");
        assert_eq!(json["action"], "START");
        assert_eq!(json["moduleTime"], 12);
    }
}
