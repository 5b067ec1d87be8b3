use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// 模块注册表配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// 当前运行环境标识
    pub environment_id: String,
    /// 是否通过独立控制任务串行执行启动/停止
    pub use_control_task: bool,
    /// 控制队列容量
    pub control_queue_capacity: usize,
    /// 不允许链接进模块代码单元的构件目录名
    pub excluded_artifacts: Vec<String>,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            environment_id: "master".to_string(),
            use_control_task: true,
            control_queue_capacity: 10000,
            excluded_artifacts: vec!["batchhost-host".to_string()],
        }
    }
}

impl RegistryConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.environment_id.trim().is_empty() {
            return Err(anyhow::anyhow!("环境标识不能为空"));
        }

        if self.control_queue_capacity == 0 {
            return Err(anyhow::anyhow!("控制队列容量必须大于0"));
        }

        Ok(())
    }
}

/// 配置驱动的模块定义
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfiguredModule {
    pub name: String,
    /// 模块代码单元所在目录
    pub artifact: PathBuf,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

/// 模块来源配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ModuleSourcesConfig {
    /// 扫描模块代码单元的目录
    pub directory: Option<PathBuf>,
    /// 配置中声明的模块
    pub configured: Vec<ConfiguredModule>,
    /// 刷新间隔（秒），0表示仅在启动时刷新一次
    pub refresh_interval_seconds: u64,
}

impl ModuleSourcesConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        let mut names = std::collections::HashSet::new();
        for module in &self.configured {
            if module.name.trim().is_empty() {
                return Err(anyhow::anyhow!("模块名称不能为空"));
            }
            if !names.insert(module.name.as_str()) {
                return Err(anyhow::anyhow!("模块名称重复: {}", module.name));
            }
        }
        Ok(())
    }
}

/// Worker协调配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// 执行组分配后的保护期（秒），期间不会因Worker未上报而被取消
    pub executing_group_grace_seconds: i64,
    /// Worker无会话且超过该时长未联系时被移除（秒）
    pub worker_idle_timeout_seconds: i64,
    /// 失联Worker检测间隔（秒）
    pub detection_interval_seconds: u64,
    /// 每个会话待发送消息的上限，写端阻塞时超出的消息被丢弃
    pub session_buffer_size: usize,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            executing_group_grace_seconds: 60,
            worker_idle_timeout_seconds: 120,
            detection_interval_seconds: 30,
            session_buffer_size: 1024,
        }
    }
}

impl CoordinatorConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.executing_group_grace_seconds < 0 {
            return Err(anyhow::anyhow!("执行组保护期不能为负数"));
        }

        if self.worker_idle_timeout_seconds <= 0 {
            return Err(anyhow::anyhow!("Worker空闲超时时间必须大于0"));
        }

        if self.detection_interval_seconds == 0 {
            return Err(anyhow::anyhow!("检测间隔必须大于0"));
        }

        if self.session_buffer_size == 0 {
            return Err(anyhow::anyhow!("会话消息缓冲区大小必须大于0"));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicate_configured_module_rejected() {
        let config = ModuleSourcesConfig {
            directory: None,
            configured: vec![
                ConfiguredModule {
                    name: "geo".into(),
                    artifact: "/a".into(),
                    enabled: true,
                },
                ConfiguredModule {
                    name: "geo".into(),
                    artifact: "/b".into(),
                    enabled: false,
                },
            ],
            refresh_interval_seconds: 0,
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_coordinator_config_validation() {
        let mut config = CoordinatorConfig::default();
        assert!(config.validate().is_ok());

        config.worker_idle_timeout_seconds = 0;
        assert!(config.validate().is_err());
    }
}
