use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// 模块生命周期状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ModuleStatus {
    #[serde(rename = "Enabled")]
    Enabled,
    #[serde(rename = "Starting")]
    Starting,
    #[serde(rename = "Started")]
    Started,
    #[serde(rename = "Stopping")]
    Stopping,
    #[serde(rename = "Stopped")]
    Stopped,
    #[serde(rename = "Disabled")]
    Disabled,
    #[serde(rename = "Start Failed")]
    StartFailed,
    #[serde(rename = "Start Requested")]
    StartRequested,
    #[serde(rename = "Stop Requested")]
    StopRequested,
}

impl ModuleStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModuleStatus::Enabled => "Enabled",
            ModuleStatus::Starting => "Starting",
            ModuleStatus::Started => "Started",
            ModuleStatus::Stopping => "Stopping",
            ModuleStatus::Stopped => "Stopped",
            ModuleStatus::Disabled => "Disabled",
            ModuleStatus::StartFailed => "Start Failed",
            ModuleStatus::StartRequested => "Start Requested",
            ModuleStatus::StopRequested => "Stop Requested",
        }
    }
}

impl fmt::Display for ModuleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 模块事件动作
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ModuleAction {
    Start,
    StartFailed,
    Stop,
    SecurityChanged,
}

impl fmt::Display for ModuleAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let value = match self {
            ModuleAction::Start => "START",
            ModuleAction::StartFailed => "START_FAILED",
            ModuleAction::Stop => "STOP",
            ModuleAction::SecurityChanged => "SECURITY_CHANGED",
        };
        f.write_str(value)
    }
}

/// 模块控制命令动作
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModuleControlAction {
    Start,
    Stop,
    Restart,
}

/// 模块生命周期事件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleEvent {
    pub action: ModuleAction,
    pub module_name: String,
    /// 事件相关的模块启动时间（毫秒），未启动过为0
    pub module_time: i64,
    pub business_application_names: Vec<String>,
}

impl ModuleEvent {
    pub fn new(
        action: ModuleAction,
        module_name: impl Into<String>,
        module_time: i64,
        business_application_names: Vec<String>,
    ) -> Self {
        Self {
            action,
            module_name: module_name.into(),
            module_time,
            business_application_names,
        }
    }

    /// Worker侧用于索引执行组的 `模块名:启动时间` 键
    pub fn module_name_and_time(&self) -> String {
        format!("{}:{}", self.module_name, self.module_time)
    }
}

/// 模块状态快照（用于查询接口）
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleInfo {
    pub name: String,
    pub status: ModuleStatus,
    pub enabled: bool,
    pub started: bool,
    pub started_time: i64,
    pub last_start_time: i64,
    pub started_date: Option<DateTime<Utc>>,
    pub module_error: Option<String>,
    pub artifact_id: String,
    pub business_application_names: Vec<String>,
}
