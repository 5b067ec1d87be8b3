use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Worker侧模块状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkerModuleStatus {
    #[serde(rename = "Initializing")]
    Initializing,
    #[serde(rename = "Loading")]
    Loading,
    #[serde(rename = "Started")]
    Started,
    #[serde(rename = "Stopped")]
    Stopped,
    #[serde(rename = "Disabled")]
    Disabled,
    #[serde(rename = "Start Failed")]
    StartFailed,
}

/// Worker上模块状态的镜像，与主节点最终一致
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerModuleState {
    pub module_name: String,
    pub enabled: bool,
    pub status: WorkerModuleStatus,
    pub started_time: i64,
    pub module_error: Option<String>,
}

impl WorkerModuleState {
    pub fn new(module_name: impl Into<String>) -> Self {
        Self {
            module_name: module_name.into(),
            enabled: false,
            status: WorkerModuleStatus::Initializing,
            started_time: 0,
            module_error: None,
        }
    }

    /// 禁用时清零启动时间
    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
        if !enabled {
            self.started_time = 0;
        }
    }

    pub fn is_started(&self) -> bool {
        self.status == WorkerModuleStatus::Started
    }
}

/// Worker状态快照（用于查询接口）
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerInfo {
    pub id: String,
    pub start_time: i64,
    pub connected: bool,
    pub last_connect_time: DateTime<Utc>,
    pub executing_group_ids: Vec<String>,
    pub module_states: Vec<WorkerModuleState>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disable_clears_started_time() {
        let mut state = WorkerModuleState::new("geo");
        assert_eq!(state.status, WorkerModuleStatus::Initializing);
        state.set_enabled(true);
        state.started_time = 1000;
        state.status = WorkerModuleStatus::Started;
        assert!(state.is_started());

        state.set_enabled(false);
        assert_eq!(state.started_time, 0);
    }
}
