//! # Batchhost Module
//!
//! 模块生命周期与注册表：插件清单的加载和校验、用户组权限、代码单元、
//! 串行化的模块控制队列、模块来源以及插件执行适配器。

pub mod code_unit;
pub mod context;
pub mod control;
pub mod manifest;
pub mod module;
pub mod permissions;
pub mod plugin;
pub mod properties;
pub mod registry;
pub mod source;
pub mod validation;

pub use code_unit::{CodeUnit, DirectoryCodeUnit, MemoryCodeUnit, Resource};
pub use context::{ModuleContext, ModuleServices};
pub use control::{ModuleControlCommand, ModuleControlQueue};
pub use manifest::{PluginManifest, RuntimeSpec, PLUGIN_MANIFEST};
pub use module::Module;
pub use plugin::{
    BuiltinPluginRuntime, BuiltinPlugins, PluginAdaptor, PluginRequest, PluginResponse,
    PluginRuntime, ProcessPluginRuntime,
};
pub use properties::{ModuleConfigProperties, CONFIG_PROPERTIES_RESOURCE, GLOBAL_COMPONENT};
pub use registry::ModuleRegistry;
pub use source::{ConfiguredModuleSource, DirectoryModuleSource, ModuleDefinition, ModuleSource};
