//! 配置管理
//!
//! 配置加载顺序：
//! 1. 各配置段的默认值
//! 2. TOML配置文件
//! 3. 环境变量覆盖（前缀 `BATCHHOST_`，层级分隔符 `__`）

pub mod models;

pub use models::{
    AppConfig, ConfiguredModule, CoordinatorConfig, LoggingConfig, ModuleSourcesConfig,
    RegistryConfig, ServerConfig,
};
