pub mod app_config;
pub mod registry_coordinator;
pub mod server_logging;

pub use app_config::AppConfig;
pub use registry_coordinator::{
    ConfiguredModule, CoordinatorConfig, ModuleSourcesConfig, RegistryConfig,
};
pub use server_logging::{LoggingConfig, ServerConfig};
