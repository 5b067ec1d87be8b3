use anyhow::{Context, Result};
use config::{Config as ConfigBuilder, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::Path;

use super::{
    registry_coordinator::{CoordinatorConfig, ModuleSourcesConfig, RegistryConfig},
    server_logging::{LoggingConfig, ServerConfig},
};

/// 默认配置文件搜索路径
const DEFAULT_CONFIG_PATHS: [&str; 3] = [
    "config/batchhost.toml",
    "batchhost.toml",
    "/etc/batchhost/config.toml",
];

/// 系统配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub registry: RegistryConfig,
    pub modules: ModuleSourcesConfig,
    pub coordinator: CoordinatorConfig,
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// 从配置文件和环境变量加载配置
    ///
    /// 未指定路径时依次尝试默认路径，均不存在则只使用默认值和环境变量。
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let mut builder = ConfigBuilder::builder();

        if let Some(path) = config_path {
            if !Path::new(path).exists() {
                return Err(anyhow::anyhow!("配置文件不存在: {}", path));
            }
            builder = builder.add_source(File::new(path, FileFormat::Toml));
        } else if let Some(path) = DEFAULT_CONFIG_PATHS
            .iter()
            .find(|path| Path::new(path).exists())
        {
            builder = builder.add_source(File::new(path, FileFormat::Toml));
        }

        builder = builder.add_source(
            Environment::with_prefix("BATCHHOST")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config: AppConfig = builder
            .build()
            .context("构建配置失败")?
            .try_deserialize()
            .context("反序列化配置失败")?;

        config.validate()?;
        Ok(config)
    }

    /// 从TOML字符串加载配置
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(toml_str).context("解析TOML配置失败")?;
        config.validate()?;
        Ok(config)
    }

    /// 序列化为TOML字符串
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("序列化配置为TOML失败")
    }

    /// 验证配置有效性
    pub fn validate(&self) -> Result<()> {
        self.server.validate().context("服务配置验证失败")?;
        self.registry.validate().context("模块注册表配置验证失败")?;
        self.modules.validate().context("模块来源配置验证失败")?;
        self.coordinator
            .validate()
            .context("Worker协调配置验证失败")?;
        self.logging.validate().context("日志配置验证失败")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.registry.environment_id, "master");
        assert_eq!(config.registry.control_queue_capacity, 10000);
        assert_eq!(config.coordinator.executing_group_grace_seconds, 60);
    }

    #[test]
    fn test_from_toml_partial_sections() {
        let config = AppConfig::from_toml(
            r#"
            [registry]
            environment_id = "test"
            use_control_task = false

            [[modules.configured]]
            name = "geo"
            artifact = "/opt/modules/geo"
            "#,
        )
        .unwrap();

        assert_eq!(config.registry.environment_id, "test");
        assert!(!config.registry.use_control_task);
        assert_eq!(config.modules.configured.len(), 1);
        assert!(config.modules.configured[0].enabled);
        assert_eq!(config.server.bind_address, "0.0.0.0:8080");
    }

    #[test]
    fn test_from_toml_rejects_invalid_values() {
        let result = AppConfig::from_toml(
            r#"
            [registry]
            control_queue_capacity = 0
            "#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
            [logging]
            level = "debug"
            format = "json"
            "#
        )
        .unwrap();

        let config = AppConfig::load(file.path().to_str()).unwrap();
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.logging.format, "json");
    }

    #[test]
    fn test_load_missing_file_fails() {
        assert!(AppConfig::load(Some("/nonexistent/batchhost.toml")).is_err());
    }

    #[test]
    fn test_toml_round_trip_keeps_values() {
        let mut config = AppConfig::default();
        config.coordinator.worker_idle_timeout_seconds = 300;
        let text = config.to_toml().unwrap();
        let parsed = AppConfig::from_toml(&text).unwrap();
        assert_eq!(parsed.coordinator.worker_idle_timeout_seconds, 300);
    }
}
