//! 模块实例与生命周期状态机
//!
//! ```text
//! Disabled --enable--> Enabled --start--> Starting --> Started
//!                                            |            |
//!                                            v          stop
//!                                      Start Failed       v
//!                                                  Stopping --> Stopped / Disabled
//! ```
//!
//! 所有状态迁移都在模块的生命周期锁内执行，`enabled && !started` 的判断与迁移本身是原子的。
//! 发现和校验过程中的错误只会记录到模块错误中，不会返回给调用方。

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use batchhost_core::models::{
    BusinessApplication, ModuleAction, ModuleControlAction, ModuleEvent, ModuleInfo,
    ModulePermissions, ModuleStatus,
};
use batchhost_core::{HostError, HostResult};

use crate::code_unit::CodeUnit;
use crate::context::ModuleContext;
use crate::manifest::{PluginManifest, RuntimeSpec, PLUGIN_MANIFEST};
use crate::permissions::{parse_user_groups, USER_GROUPS_RESOURCE};
use crate::plugin::{BuiltinPluginRuntime, PluginAdaptor, PluginRuntime, ProcessPluginRuntime};
use crate::properties::{
    parse_config_properties, ModuleConfigProperties, CONFIG_PROPERTIES_RESOURCE, GLOBAL_COMPONENT,
};
use crate::validation::ManifestValidator;

/// 模块错误文本的最大长度
const MAX_MODULE_ERROR_LENGTH: usize = 2000;

#[derive(Clone)]
struct LoadedApplication {
    application: Arc<BusinessApplication>,
    plugin_class: String,
}

struct LoadedModule {
    applications: Vec<LoadedApplication>,
    runtime: Arc<dyn PluginRuntime>,
    permissions: Arc<ModulePermissions>,
}

struct ModuleState {
    status: ModuleStatus,
    enabled: bool,
    initialized: bool,
    started: bool,
    started_time: i64,
    last_start_time: i64,
    started_date: Option<DateTime<Utc>>,
    module_error: String,
    applications: Vec<LoadedApplication>,
    runtime: Option<Arc<dyn PluginRuntime>>,
    permissions: Option<Arc<ModulePermissions>>,
}

impl Default for ModuleState {
    fn default() -> Self {
        Self {
            status: ModuleStatus::Disabled,
            enabled: false,
            initialized: false,
            started: false,
            started_time: 0,
            last_start_time: 0,
            started_date: None,
            module_error: String::new(),
            applications: Vec::new(),
            runtime: None,
            permissions: None,
        }
    }
}

impl ModuleState {
    fn application_names(&self) -> Vec<String> {
        self.applications
            .iter()
            .map(|loaded| loaded.application.name.clone())
            .collect()
    }
}

/// 一个可部署的插件模块
pub struct Module {
    name: String,
    code_unit: Arc<dyn CodeUnit>,
    context: Arc<ModuleContext>,
    lifecycle: Mutex<()>,
    state: RwLock<ModuleState>,
}

impl Module {
    pub fn new(
        name: impl Into<String>,
        code_unit: Arc<dyn CodeUnit>,
        context: Arc<ModuleContext>,
    ) -> Self {
        Self {
            name: name.into(),
            code_unit,
            context,
            lifecycle: Mutex::new(()),
            state: RwLock::new(ModuleState::default()),
        }
    }

    fn read_state(&self) -> RwLockReadGuard<'_, ModuleState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, ModuleState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn code_unit(&self) -> &Arc<dyn CodeUnit> {
        &self.code_unit
    }

    pub fn artifact_id(&self) -> &str {
        self.code_unit.artifact_id()
    }

    pub fn status(&self) -> ModuleStatus {
        self.read_state().status
    }

    pub fn is_enabled(&self) -> bool {
        self.read_state().enabled
    }

    pub fn is_initialized(&self) -> bool {
        self.read_state().initialized
    }

    pub fn is_started(&self) -> bool {
        self.read_state().started
    }

    /// 当前启动时间（毫秒），未启动为0
    pub fn started_time(&self) -> i64 {
        self.read_state().started_time
    }

    pub fn last_start_time(&self) -> i64 {
        self.read_state().last_start_time
    }

    pub fn module_error(&self) -> Option<String> {
        let state = self.read_state();
        if state.module_error.is_empty() {
            None
        } else {
            Some(state.module_error.clone())
        }
    }

    pub fn has_error(&self) -> bool {
        !self.read_state().module_error.is_empty()
    }

    pub fn business_application_names(&self) -> Vec<String> {
        self.read_state().application_names()
    }

    pub fn business_applications(&self) -> Vec<Arc<BusinessApplication>> {
        self.read_state()
            .applications
            .iter()
            .map(|loaded| loaded.application.clone())
            .collect()
    }

    pub fn business_application(&self, name: &str) -> Option<Arc<BusinessApplication>> {
        self.read_state()
            .applications
            .iter()
            .find(|loaded| loaded.application.name == name)
            .map(|loaded| loaded.application.clone())
    }

    /// 启动时解析的用户组权限
    pub fn permissions(&self) -> Option<Arc<ModulePermissions>> {
        self.read_state().permissions.clone()
    }

    pub fn info(&self) -> ModuleInfo {
        let state = self.read_state();
        ModuleInfo {
            name: self.name.clone(),
            status: state.status,
            enabled: state.enabled,
            started: state.started,
            started_time: state.started_time,
            last_start_time: state.last_start_time,
            started_date: state.started_date,
            module_error: (!state.module_error.is_empty()).then(|| state.module_error.clone()),
            artifact_id: self.code_unit.artifact_id().to_string(),
            business_application_names: state.application_names(),
        }
    }

    /// 追加模块错误，超长时截断
    pub fn add_module_error(&self, message: &str) {
        error!(module = %self.name, "无法初始化模块: {}", message);
        let mut state = self.write_state();
        state.module_error.push_str(message);
        state.module_error.push('\n');
        if state.module_error.chars().count() > MAX_MODULE_ERROR_LENGTH {
            let truncated: String = state
                .module_error
                .chars()
                .take(MAX_MODULE_ERROR_LENGTH - 3)
                .collect();
            state.module_error = truncated + "...";
        }
        if !state.started {
            state.status = ModuleStatus::StartFailed;
        }
    }

    pub fn clear_module_error(&self) {
        self.write_state().module_error.clear();
    }

    /// 启用模块；首次启用时初始化并请求启动
    pub async fn enable(&self) -> HostResult<()> {
        let first_time = {
            let mut state = self.write_state();
            state.enabled = true;
            if state.initialized {
                false
            } else {
                state.initialized = true;
                state.status = ModuleStatus::Enabled;
                true
            }
        };
        if first_time {
            self.start().await?;
        }
        Ok(())
    }

    pub async fn disable(&self) -> HostResult<()> {
        let started = {
            let mut state = self.write_state();
            state.enabled = false;
            state.initialized = false;
            if !state.started {
                state.status = ModuleStatus::Disabled;
            }
            state.started
        };
        if started {
            self.stop().await?;
        }
        Ok(())
    }

    /// 请求启动，已禁用的模块忽略该请求
    pub async fn start(&self) -> HostResult<()> {
        if !self.is_enabled() {
            return Ok(());
        }
        self.write_state().status = ModuleStatus::StartRequested;
        self.request(ModuleControlAction::Start).await
    }

    pub async fn stop(&self) -> HostResult<()> {
        self.write_state().status = ModuleStatus::StopRequested;
        self.request(ModuleControlAction::Stop).await
    }

    pub async fn restart(&self) -> HostResult<()> {
        self.request(ModuleControlAction::Restart).await
    }

    async fn request(&self, action: ModuleControlAction) -> HostResult<()> {
        if !self.context.request(&self.name, action).await? {
            self.run_control(action).await;
        }
        Ok(())
    }

    /// 执行控制命令，由控制任务或内联模式调用
    pub(crate) async fn run_control(&self, action: ModuleControlAction) {
        let _guard = self.lifecycle.lock().await;
        match action {
            ModuleControlAction::Start => self.start_locked().await,
            ModuleControlAction::Stop => self.stop_locked().await,
            ModuleControlAction::Restart => {
                self.stop_locked().await;
                self.start_locked().await;
            }
        }
    }

    /// 控制命令异常终止后记录错误，启动中的模块回到启动失败状态
    pub(crate) fn control_failed(&self, message: &str) {
        self.add_module_error(message);
        let mut state = self.write_state();
        if matches!(state.status, ModuleStatus::Starting | ModuleStatus::StartFailed) {
            state.started = false;
            state.started_time = 0;
            state.started_date = None;
            state.applications.clear();
            state.runtime = None;
            state.permissions = None;
            state.status = ModuleStatus::StartFailed;
        }
    }

    /// 卸载前停止并禁用模块
    pub(crate) async fn unload(&self) {
        {
            let mut state = self.write_state();
            state.enabled = false;
            state.initialized = false;
        }
        self.run_control(ModuleControlAction::Stop).await;
    }

    async fn start_locked(&self) {
        {
            let mut state = self.write_state();
            if !state.enabled {
                state.status = ModuleStatus::Disabled;
                return;
            }
            if state.started {
                state.status = ModuleStatus::Started;
                return;
            }
            state.status = ModuleStatus::Starting;
            state.module_error.clear();
        }
        info!(module = %self.name, "开始启动模块");

        match self.load().await {
            Ok(loaded) => {
                let (module_time, names) = {
                    let mut state = self.write_state();
                    let now = Utc::now();
                    // 重启后的启动时间必须与上一次不同
                    let module_time = now.timestamp_millis().max(state.last_start_time + 1);
                    state.started = true;
                    state.started_time = module_time;
                    state.started_date = Some(now);
                    state.applications = loaded.applications;
                    state.runtime = Some(loaded.runtime);
                    state.permissions = Some(loaded.permissions);
                    state.status = ModuleStatus::Started;
                    (module_time, state.application_names())
                };
                self.context.invalidate();

                for name in &names {
                    info!(module = %self.name, application = %name, "发现业务应用");
                }
                info!(module = %self.name, module_time, "模块启动完成");
                self.context
                    .emit(ModuleEvent::new(
                        ModuleAction::Start,
                        &self.name,
                        module_time,
                        names,
                    ))
                    .await;
            }
            Err(errors) => {
                for message in &errors {
                    self.add_module_error(message);
                }
                {
                    let mut state = self.write_state();
                    state.started = false;
                    state.applications.clear();
                    state.runtime = None;
                    state.permissions = None;
                    state.status = ModuleStatus::StartFailed;
                }
                warn!(module = %self.name, errors = errors.len(), "模块启动失败");
                self.context
                    .emit(ModuleEvent::new(
                        ModuleAction::StartFailed,
                        &self.name,
                        0,
                        Vec::new(),
                    ))
                    .await;
            }
        }
    }

    async fn stop_locked(&self) {
        let stopped = {
            let mut state = self.write_state();
            if state.started {
                let names = state.application_names();
                let module_time = state.started_time;
                state.status = ModuleStatus::Stopping;
                state.started = false;
                state.last_start_time = module_time;
                state.started_time = 0;
                state.started_date = None;
                state.applications.clear();
                state.runtime = None;
                state.permissions = None;
                Some((module_time, names))
            } else {
                state.status = if state.enabled {
                    ModuleStatus::Stopped
                } else {
                    ModuleStatus::Disabled
                };
                None
            }
        };

        if let Some((module_time, names)) = stopped {
            self.context.invalidate();
            self.context
                .emit(ModuleEvent::new(
                    ModuleAction::Stop,
                    &self.name,
                    module_time,
                    names,
                ))
                .await;

            let mut state = self.write_state();
            state.status = if state.enabled {
                ModuleStatus::Stopped
            } else {
                ModuleStatus::Disabled
            };
            info!(module = %self.name, "模块已停止");
        }
    }

    async fn load(&self) -> Result<LoadedModule, Vec<String>> {
        let manifests = self
            .code_unit
            .resources(PLUGIN_MANIFEST)
            .map_err(|e| vec![format!("无法读取 {PLUGIN_MANIFEST}: {e}")])?;
        let manifest = match manifests.as_slice() {
            [] => {
                return Err(vec![format!("模块代码单元中未找到 {PLUGIN_MANIFEST}")]);
            }
            [resource] => PluginManifest::from_bytes(&resource.data).map_err(|e| vec![e.to_string()])?,
            resources => {
                let paths: Vec<&str> = resources.iter().map(|r| r.path.as_str()).collect();
                return Err(vec![format!(
                    "模块代码单元中只能有一个 {PLUGIN_MANIFEST}，实际找到: {}",
                    paths.join(", ")
                )]);
            }
        };

        let mut errors = Vec::new();
        let permissions = self.load_permissions(&mut errors);
        let config_properties = self.load_config_properties(&mut errors);

        let (plugins, validation) = ManifestValidator::new(&self.name).validate(&manifest);
        errors.extend(validation.errors.iter().map(ToString::to_string));

        let runtime = self.create_runtime(&manifest, &mut errors);
        if !errors.is_empty() {
            return Err(errors);
        }
        let Some(runtime) = runtime else {
            return Err(vec!["无法创建插件运行时".to_string()]);
        };

        let module_properties = match self.module_properties(&config_properties).await {
            Ok(properties) => properties,
            Err(e) => {
                errors.push(format!("无法同步配置属性: {e}"));
                BTreeMap::new()
            }
        };

        let mut applications = Vec::with_capacity(plugins.len());
        for plugin in plugins {
            let mut application = plugin.application;
            application.properties = module_properties.clone();
            if let Err(e) = self
                .apply_config_properties(&config_properties, &mut application)
                .await
            {
                errors.push(format!("无法加载业务应用 {} 的配置属性: {e}", application.name));
            }
            applications.push(LoadedApplication {
                application: Arc::new(application),
                plugin_class: plugin.plugin_class,
            });
        }

        if let Some(store) = &self.context.services().user_group_store {
            if let Err(e) = store
                .sync_module_groups(
                    &self.name,
                    &permissions.permissions_by_group_name,
                    &permissions.group_names_to_delete,
                )
                .await
            {
                errors.push(format!("无法同步用户组: {e}"));
            }
        }

        if !errors.is_empty() {
            return Err(errors);
        }
        Ok(LoadedModule {
            applications,
            runtime,
            permissions: Arc::new(permissions),
        })
    }

    fn load_permissions(&self, errors: &mut Vec<String>) -> ModulePermissions {
        match self.code_unit.resources(USER_GROUPS_RESOURCE) {
            Ok(resources) => match resources.as_slice() {
                [] => ModulePermissions::new(&self.name),
                [resource] => {
                    let (permissions, group_errors) = parse_user_groups(&self.name, &resource.data);
                    errors.extend(group_errors);
                    permissions
                }
                _ => {
                    errors.push(format!("模块代码单元中只能有一个 {USER_GROUPS_RESOURCE}"));
                    ModulePermissions::new(&self.name)
                }
            },
            Err(e) => {
                errors.push(format!("无法读取 {USER_GROUPS_RESOURCE}: {e}"));
                ModulePermissions::new(&self.name)
            }
        }
    }

    fn load_config_properties(&self, errors: &mut Vec<String>) -> ModuleConfigProperties {
        match self.code_unit.resources(CONFIG_PROPERTIES_RESOURCE) {
            Ok(resources) => match resources.as_slice() {
                [] => ModuleConfigProperties::default(),
                [resource] => {
                    let (properties, property_errors) = parse_config_properties(&resource.data);
                    errors.extend(property_errors);
                    properties
                }
                _ => {
                    errors.push(format!("模块代码单元中只能有一个 {CONFIG_PROPERTIES_RESOURCE}"));
                    ModuleConfigProperties::default()
                }
            },
            Err(e) => {
                errors.push(format!("无法读取 {CONFIG_PROPERTIES_RESOURCE}: {e}"));
                ModuleConfigProperties::default()
            }
        }
    }

    /// 模块级属性；有存储时先把声明的属性同步到存储，再以存储中的值为准
    async fn module_properties(
        &self,
        config_properties: &ModuleConfigProperties,
    ) -> HostResult<BTreeMap<String, Value>> {
        let environment = self.context.environment_id();
        match &self.context.services().config_store {
            Some(store) => {
                config_properties.sync(store.as_ref(), &self.name).await?;
                store
                    .effective_properties(environment, &self.name, GLOBAL_COMPONENT)
                    .await
            }
            None => Ok(config_properties.effective(environment, GLOBAL_COMPONENT)),
        }
    }

    fn create_runtime(
        &self,
        manifest: &PluginManifest,
        errors: &mut Vec<String>,
    ) -> Option<Arc<dyn PluginRuntime>> {
        match &manifest.runtime {
            RuntimeSpec::Builtin => {
                let builtin = &self.context.services().builtin_plugins;
                let missing: Vec<&str> = manifest
                    .plugins
                    .iter()
                    .map(|plugin| plugin.class.as_str())
                    .filter(|class| !builtin.contains(class))
                    .collect();
                if missing.is_empty() {
                    Some(Arc::new(BuiltinPluginRuntime::new(builtin.clone())))
                } else {
                    errors.push(format!("未注册内置插件处理器: {}", missing.join(", ")));
                    None
                }
            }
            RuntimeSpec::Process { command, args } => {
                let root = self.code_unit.root().map(|root| root.to_path_buf());
                let mut program = PathBuf::from(command);
                if let Some(root) = &root {
                    if program.is_relative() && root.join(&program).exists() {
                        program = root.join(&program);
                    }
                }
                Some(Arc::new(ProcessPluginRuntime::new(program, args.clone(), root)))
            }
        }
    }

    async fn apply_config_properties(
        &self,
        config_properties: &ModuleConfigProperties,
        application: &mut BusinessApplication,
    ) -> HostResult<()> {
        let environment = self.context.environment_id();
        let component = application.component_name();
        let properties = match &self.context.services().config_store {
            Some(store) => {
                store
                    .effective_properties(environment, &self.name, &component)
                    .await?
            }
            None => config_properties.effective(environment, &component),
        };
        application.properties.extend(properties);
        Ok(())
    }

    /// 为一次执行创建新的请求级插件实例
    pub fn business_application_plugin(
        &self,
        application_name: &str,
        execution_id: &str,
        log_level: &str,
    ) -> HostResult<PluginAdaptor> {
        let state = self.read_state();
        if !state.started {
            return Err(HostError::ModuleNotStarted {
                name: self.name.clone(),
            });
        }
        let loaded = state
            .applications
            .iter()
            .find(|loaded| loaded.application.name == application_name)
            .cloned()
            .ok_or_else(|| HostError::BusinessApplicationNotFound {
                name: application_name.to_string(),
            })?;
        let runtime = state.runtime.clone().ok_or_else(|| HostError::ModuleNotStarted {
            name: self.name.clone(),
        })?;

        let log_level = if log_level.is_empty() {
            loaded.application.log_level.clone()
        } else {
            log_level.to_string()
        };
        Ok(PluginAdaptor::new(
            loaded.application,
            loaded.plugin_class,
            runtime,
            execution_id,
            log_level,
        ))
    }
}

impl std::fmt::Debug for Module {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Module")
            .field("name", &self.name)
            .field("status", &self.status())
            .finish()
    }
}
