//! 插件运行时与执行适配器

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use batchhost_core::models::BusinessApplication;
use batchhost_core::{HostError, HostResult};

/// 发给插件实例的一次执行请求
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginRequest {
    pub business_application_name: String,
    pub plugin_class: String,
    pub execution_id: String,
    pub log_level: String,
    pub parameters: Map<String, Value>,
}

/// 插件执行结果
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PluginResponse {
    pub results: Map<String, Value>,
    pub result_list: Vec<Map<String, Value>>,
}

/// 插件运行时，每次执行对应一个新的请求级插件实例
#[async_trait]
pub trait PluginRuntime: Send + Sync {
    async fn execute(&self, request: PluginRequest) -> HostResult<PluginResponse>;
}

pub type BuiltinHandler = Arc<dyn Fn(&PluginRequest) -> HostResult<PluginResponse> + Send + Sync>;

/// 宿主内注册的插件处理器，按插件类名索引
#[derive(Clone, Default)]
pub struct BuiltinPlugins {
    handlers: HashMap<String, BuiltinHandler>,
}

impl BuiltinPlugins {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, plugin_class: impl Into<String>, handler: F)
    where
        F: Fn(&PluginRequest) -> HostResult<PluginResponse> + Send + Sync + 'static,
    {
        self.handlers.insert(plugin_class.into(), Arc::new(handler));
    }

    pub fn contains(&self, plugin_class: &str) -> bool {
        self.handlers.contains_key(plugin_class)
    }

    pub fn get(&self, plugin_class: &str) -> Option<BuiltinHandler> {
        self.handlers.get(plugin_class).cloned()
    }
}

impl fmt::Debug for BuiltinPlugins {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut classes: Vec<&String> = self.handlers.keys().collect();
        classes.sort();
        f.debug_struct("BuiltinPlugins")
            .field("classes", &classes)
            .finish()
    }
}

/// 在宿主进程内执行的插件运行时
pub struct BuiltinPluginRuntime {
    plugins: BuiltinPlugins,
}

impl BuiltinPluginRuntime {
    pub fn new(plugins: BuiltinPlugins) -> Self {
        Self { plugins }
    }
}

#[async_trait]
impl PluginRuntime for BuiltinPluginRuntime {
    async fn execute(&self, request: PluginRequest) -> HostResult<PluginResponse> {
        let handler = self.plugins.get(&request.plugin_class).ok_or_else(|| {
            HostError::Plugin(format!("未注册内置插件处理器: {}", request.plugin_class))
        })?;
        handler(&request)
    }
}

/// 每次执行启动一个子进程，请求JSON写入stdin，结果JSON从stdout读取
pub struct ProcessPluginRuntime {
    command: PathBuf,
    args: Vec<String>,
    working_dir: Option<PathBuf>,
}

impl ProcessPluginRuntime {
    pub fn new(command: PathBuf, args: Vec<String>, working_dir: Option<PathBuf>) -> Self {
        Self {
            command,
            args,
            working_dir,
        }
    }
}

#[async_trait]
impl PluginRuntime for ProcessPluginRuntime {
    async fn execute(&self, request: PluginRequest) -> HostResult<PluginResponse> {
        let input = serde_json::to_vec(&request)?;

        let mut command = Command::new(&self.command);
        command
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.working_dir {
            command.current_dir(dir);
        }

        debug!(
            command = %self.command.display(),
            execution_id = %request.execution_id,
            "启动插件进程"
        );
        let mut child = command.spawn().map_err(|e| {
            HostError::Plugin(format!("无法启动插件进程 {}: {e}", self.command.display()))
        })?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(&input).await?;
            stdin.shutdown().await?;
        }

        let output = child.wait_with_output().await?;
        if !output.status.success() {
            return Err(HostError::Plugin(format!(
                "插件进程退出状态 {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        serde_json::from_slice(&output.stdout)
            .map_err(|e| HostError::Plugin(format!("插件输出不是有效的JSON: {e}")))
    }
}

/// 单次执行的插件适配器：设置参数、执行并读取结果
pub struct PluginAdaptor {
    application: Arc<BusinessApplication>,
    plugin_class: String,
    runtime: Arc<dyn PluginRuntime>,
    execution_id: String,
    log_level: String,
    parameters: Map<String, Value>,
    response: Option<PluginResponse>,
}

impl PluginAdaptor {
    pub fn new(
        application: Arc<BusinessApplication>,
        plugin_class: impl Into<String>,
        runtime: Arc<dyn PluginRuntime>,
        execution_id: impl Into<String>,
        log_level: impl Into<String>,
    ) -> Self {
        Self {
            application,
            plugin_class: plugin_class.into(),
            runtime,
            execution_id: execution_id.into(),
            log_level: log_level.into(),
            parameters: Map::new(),
            response: None,
        }
    }

    pub fn application(&self) -> &BusinessApplication {
        &self.application
    }

    pub fn execution_id(&self) -> &str {
        &self.execution_id
    }

    /// 设置参数，未声明的参数视为错误
    pub fn set_parameters(&mut self, parameters: &Map<String, Value>) -> HostResult<()> {
        for (name, value) in parameters {
            if self.application.parameter(name).is_none() {
                return Err(HostError::Plugin(format!(
                    "业务应用 {} 没有参数 {name}",
                    self.application.name
                )));
            }
            self.parameters.insert(name.clone(), value.clone());
        }
        Ok(())
    }

    pub async fn execute(&mut self) -> HostResult<()> {
        if let Some(missing) = self
            .application
            .parameters
            .iter()
            .find(|parameter| parameter.required && !self.parameters.contains_key(&parameter.name))
        {
            return Err(HostError::Plugin(format!("缺少必填参数: {}", missing.name)));
        }

        let request = PluginRequest {
            business_application_name: self.application.name.clone(),
            plugin_class: self.plugin_class.clone(),
            execution_id: self.execution_id.clone(),
            log_level: self.log_level.clone(),
            parameters: self.parameters.clone(),
        };
        self.response = Some(self.runtime.execute(request).await?);
        Ok(())
    }

    fn response(&self) -> HostResult<&PluginResponse> {
        self.response
            .as_ref()
            .ok_or_else(|| HostError::Plugin("插件尚未执行".to_string()))
    }

    /// 按结果属性定义取出结果，缺失的属性为 `null`
    pub fn result_fields(&self) -> HostResult<Map<String, Value>> {
        let response = self.response()?;
        if self.application.has_result_list() {
            return Err(HostError::Plugin(format!(
                "业务应用 {} 返回结果列表",
                self.application.name
            )));
        }
        Ok(self.select_attributes(&response.results))
    }

    pub fn result_list(&self) -> HostResult<Vec<Map<String, Value>>> {
        let response = self.response()?;
        if !self.application.has_result_list() {
            return Err(HostError::Plugin(format!(
                "业务应用 {} 没有结果列表",
                self.application.name
            )));
        }
        Ok(response
            .result_list
            .iter()
            .map(|row| self.select_attributes(row))
            .collect())
    }

    fn select_attributes(&self, values: &Map<String, Value>) -> Map<String, Value> {
        self.application
            .result_attributes
            .iter()
            .map(|attribute| {
                let value = values.get(&attribute.name).cloned().unwrap_or(Value::Null);
                (attribute.name.clone(), value)
            })
            .collect()
    }
}
