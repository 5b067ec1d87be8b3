//! 插件清单 `plugin.toml`
//!
//! 每个模块代码单元包含且仅包含一个清单，声明插件运行方式以及各业务应用的
//! 参数、结果和权限。清单只做反序列化，规则检查见 [`crate::validation`]。

use serde::Deserialize;

use batchhost_core::models::GeometryConfig;
use batchhost_core::{HostError, HostResult};

/// 插件清单文件名
pub const PLUGIN_MANIFEST: &str = "plugin.toml";

/// 插件清单
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PluginManifest {
    #[serde(default)]
    pub runtime: RuntimeSpec,
    #[serde(default)]
    pub plugins: Vec<PluginDescriptor>,
}

impl PluginManifest {
    pub fn parse(text: &str) -> HostResult<Self> {
        toml::from_str(text).map_err(|e| HostError::InvalidManifest(e.to_string()))
    }

    pub fn from_bytes(data: &[u8]) -> HostResult<Self> {
        let text = std::str::from_utf8(data)
            .map_err(|e| HostError::InvalidManifest(format!("清单不是有效的UTF-8: {e}")))?;
        Self::parse(text)
    }
}

/// 插件实例的创建方式
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum RuntimeSpec {
    /// 每次执行启动一个进程，请求和结果通过stdin/stdout以JSON传递
    Process {
        command: String,
        #[serde(default)]
        args: Vec<String>,
    },
    /// 宿主内注册的处理器
    #[default]
    Builtin,
}

/// 单个插件（业务应用）的声明
#[derive(Debug, Clone, Deserialize)]
pub struct PluginDescriptor {
    pub class: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default = "default_scope")]
    pub scope: String,
    #[serde(default)]
    pub per_request_input_data: bool,
    #[serde(default)]
    pub per_request_result_data: bool,
    #[serde(default = "default_batch_mode_permission")]
    pub batch_mode_permission: String,
    #[serde(default = "default_instant_mode_permission")]
    pub instant_mode_permission: String,
    #[serde(default = "default_max_requests_per_job")]
    pub max_requests_per_job: u32,
    #[serde(default = "default_num_requests_per_worker")]
    pub num_requests_per_worker: u32,
    #[serde(default = "default_max_concurrent_requests")]
    pub max_concurrent_requests: u32,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub security_service_required: bool,
    #[serde(default)]
    pub input_data_content_types: Vec<String>,
    #[serde(default)]
    pub result_data_content_types: Vec<String>,
    #[serde(default)]
    pub hooks: PluginHooks,
    #[serde(default)]
    pub parameters: Vec<ParameterSpec>,
    #[serde(default)]
    pub results: Vec<AttributeSpec>,
    #[serde(default)]
    pub result_lists: Vec<ResultListSpec>,
}

impl PluginDescriptor {
    /// 未声明名称时使用去掉 `Plugin` 后缀的类名
    pub fn application_name(&self) -> String {
        match &self.name {
            Some(name) => name.trim().to_string(),
            None => self
                .class
                .strip_suffix("Plugin")
                .unwrap_or(&self.class)
                .to_string(),
        }
    }
}

/// 插件实现的不透明数据读写钩子
#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(default)]
pub struct PluginHooks {
    pub set_input_data: bool,
    pub set_input_data_content_type: bool,
    pub set_result_data: bool,
    pub set_result_data_content_type: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ParameterSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub data_type: String,
    pub index: u32,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub job_parameter: bool,
    #[serde(default)]
    pub request_parameter: bool,
    #[serde(default)]
    pub geometry: Option<GeometryConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AttributeSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub data_type: String,
    pub index: u32,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub geometry: Option<GeometryConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResultListSpec {
    pub name: String,
    #[serde(default)]
    pub attributes: Vec<AttributeSpec>,
}

fn default_version() -> String {
    "1.0.0".to_string()
}

fn default_scope() -> String {
    "prototype".to_string()
}

fn default_batch_mode_permission() -> String {
    "permitAll".to_string()
}

fn default_instant_mode_permission() -> String {
    "denyAll".to_string()
}

fn default_max_requests_per_job() -> u32 {
    i32::MAX as u32
}

fn default_num_requests_per_worker() -> u32 {
    1
}

fn default_max_concurrent_requests() -> u32 {
    100
}

fn default_log_level() -> String {
    "ERROR".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_minimal_manifest() {
        let manifest = PluginManifest::parse(
            r#"
            [[plugins]]
            class = "WaitPlugin"

            [[plugins.parameters]]
            name = "waitTime"
            type = "integer"
            index = 1
            request_parameter = true

            [[plugins.results]]
            name = "waitTime"
            type = "integer"
            index = 1
            "#,
        )
        .unwrap();

        assert_eq!(manifest.runtime, RuntimeSpec::Builtin);
        let plugin = &manifest.plugins[0];
        assert_eq!(plugin.application_name(), "Wait");
        assert_eq!(plugin.scope, "prototype");
        assert_eq!(plugin.batch_mode_permission, "permitAll");
        assert_eq!(plugin.max_requests_per_job, 2147483647);
        assert!(plugin.parameters[0].request_parameter);
    }

    #[test]
    fn test_parse_process_runtime() {
        let manifest = PluginManifest::parse(
            r#"
            [runtime]
            kind = "process"
            command = "bin/plugin"
            args = ["--json"]
            "#,
        )
        .unwrap();
        assert_eq!(
            manifest.runtime,
            RuntimeSpec::Process {
                command: "bin/plugin".into(),
                args: vec!["--json".into()]
            }
        );
        assert!(manifest.plugins.is_empty());
    }

    #[test]
    fn test_invalid_toml_is_manifest_error() {
        let err = PluginManifest::parse("[[plugins]\nclass=").unwrap_err();
        assert!(matches!(err, HostError::InvalidManifest(_)));
    }
}
