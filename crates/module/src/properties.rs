//! 模块默认配置属性 `config-properties.json`
//!
//! 资源是属性记录列表：
//!
//! ```json
//! [
//!   {"environmentName": "prod", "componentName": "GLOBAL", "name": "maxWait", "type": "integer", "value": 20},
//!   {"name": "oldUrl", "action": "delete"}
//! ]
//! ```
//!
//! `environmentName` 缺省为 `DEFAULT`，`componentName` 缺省为 `GLOBAL`，`type` 缺省为 `string`。

use std::collections::{BTreeMap, BTreeSet};

use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use batchhost_core::traits::{ConfigPropertyStore, DEFAULT_ENVIRONMENT};
use batchhost_core::HostResult;

/// 默认配置属性资源名
pub const CONFIG_PROPERTIES_RESOURCE: &str = "config-properties.json";

/// 模块级属性的组件名，业务应用属性在其之上叠加
pub const GLOBAL_COMPONENT: &str = "GLOBAL";

type PropertyKey = (String, String);

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConfigPropertyEntry {
    #[serde(default)]
    environment_name: Option<String>,
    #[serde(default)]
    component_name: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default, rename = "type")]
    value_type: Option<String>,
    #[serde(default)]
    value: Value,
    #[serde(default)]
    action: Option<String>,
}

/// 模块声明的配置属性，按（环境，组件）分组
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModuleConfigProperties {
    pub properties: BTreeMap<PropertyKey, BTreeMap<String, Value>>,
    pub deletes: BTreeMap<PropertyKey, BTreeSet<String>>,
}

impl ModuleConfigProperties {
    /// 属性是否被删除；`DEFAULT` 环境的删除对所有环境生效
    pub fn is_deleted(&self, environment_name: &str, component_name: &str, name: &str) -> bool {
        let deleted_in = |environment: &str| {
            self.deletes
                .get(&(environment.to_string(), component_name.to_string()))
                .is_some_and(|names| names.contains(name))
        };
        deleted_in(environment_name)
            || (environment_name != DEFAULT_ENVIRONMENT && deleted_in(DEFAULT_ENVIRONMENT))
    }

    /// 不使用存储时的生效属性：`DEFAULT` 环境叠加指定环境
    pub fn effective(&self, environment_name: &str, component_name: &str) -> BTreeMap<String, Value> {
        let get = |environment: &str| {
            self.properties
                .get(&(environment.to_string(), component_name.to_string()))
                .cloned()
                .unwrap_or_default()
        };
        let mut properties = get(DEFAULT_ENVIRONMENT);
        if environment_name != DEFAULT_ENVIRONMENT {
            properties.extend(get(environment_name));
        }
        properties
    }

    fn components(&self) -> BTreeSet<&str> {
        self.properties
            .keys()
            .chain(self.deletes.keys())
            .map(|(_, component)| component.as_str())
            .collect()
    }

    /// 把属性同步到配置属性存储
    ///
    /// 存储中已有的属性不会被覆盖，被删除的属性从存储中移除。
    pub async fn sync(&self, store: &dyn ConfigPropertyStore, module_name: &str) -> HostResult<()> {
        for component in self.components() {
            let existing = store.component_properties(module_name, component).await?;
            for (environment, properties) in &existing {
                for name in properties.keys() {
                    if self.is_deleted(environment, component, name) {
                        store
                            .delete_property(environment, module_name, component, name)
                            .await?;
                        debug!(module = %module_name, environment = %environment, component, name = %name, "删除配置属性");
                    }
                }
            }

            for ((environment, _), properties) in self
                .properties
                .iter()
                .filter(|((_, key_component), _)| key_component == component)
            {
                for (name, value) in properties {
                    let exists = existing
                        .get(environment)
                        .is_some_and(|stored| stored.contains_key(name));
                    if !exists {
                        store
                            .save_property(environment, module_name, component, name, value.clone())
                            .await?;
                    }
                }
            }
        }
        Ok(())
    }
}

/// 解析模块的配置属性记录
///
/// 出错的记录被跳过，错误一并返回。
pub fn parse_config_properties(data: &[u8]) -> (ModuleConfigProperties, Vec<String>) {
    let mut definitions = ModuleConfigProperties::default();
    let mut errors = Vec::new();

    let entries: Vec<Value> = match serde_json::from_slice(data) {
        Ok(entries) => entries,
        Err(e) => {
            errors.push(format!("无法解析 {CONFIG_PROPERTIES_RESOURCE}: {e}"));
            return (definitions, errors);
        }
    };

    for raw in entries {
        let entry: ConfigPropertyEntry = match serde_json::from_value(raw.clone()) {
            Ok(entry) => entry,
            Err(e) => {
                errors.push(format!("无效的配置属性定义 {raw}: {e}"));
                continue;
            }
        };

        let Some(name) = entry.name.filter(|name| !name.trim().is_empty()) else {
            errors.push(format!("配置属性必须有名称: {raw}"));
            continue;
        };
        let environment = entry
            .environment_name
            .filter(|environment| !environment.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_ENVIRONMENT.to_string());
        let component = entry
            .component_name
            .filter(|component| !component.trim().is_empty())
            .unwrap_or_else(|| GLOBAL_COMPONENT.to_string());

        if entry.action.as_deref() == Some("delete") {
            definitions
                .deletes
                .entry((environment, component))
                .or_default()
                .insert(name);
            continue;
        }

        let value_type = entry.value_type.as_deref().unwrap_or("string");
        match convert_value(value_type, entry.value) {
            Ok(value) => {
                definitions
                    .properties
                    .entry((environment, component))
                    .or_default()
                    .insert(name, value);
            }
            Err(message) => errors.push(format!("配置属性 {name} {message}: {raw}")),
        }
    }

    (definitions, errors)
}

fn convert_value(value_type: &str, value: Value) -> Result<Value, String> {
    let text = match &value {
        Value::Null => return Ok(Value::Null),
        Value::String(text) => text.trim().to_string(),
        other => other.to_string(),
    };
    let invalid = || format!("的值不是有效的 {value_type}");
    match value_type.to_ascii_lowercase().as_str() {
        "string" => Ok(match value {
            Value::String(_) => value,
            _ => Value::String(text),
        }),
        "boolean" => text.parse::<bool>().map(Value::Bool).map_err(|_| invalid()),
        "byte" | "short" | "int" | "integer" | "long" => text
            .parse::<i64>()
            .map(Value::from)
            .map_err(|_| invalid()),
        "float" | "double" => text
            .parse::<f64>()
            .ok()
            .and_then(serde_json::Number::from_f64)
            .map(Value::Number)
            .ok_or_else(invalid),
        _ => Ok(value),
    }
}
