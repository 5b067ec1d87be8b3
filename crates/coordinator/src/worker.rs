//! 远程Worker进程在主节点上的代理

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use batchhost_core::models::{ExecutionGroup, MasterMessage, WorkerInfo, WorkerModuleState};

#[derive(Default)]
struct ExecutingGroups {
    by_base_id: BTreeMap<String, Arc<ExecutionGroup>>,
    /// `模块名:启动时间` -> 基础ID
    by_module: BTreeMap<String, BTreeSet<String>>,
}

struct SessionSender {
    session_id: u64,
    sender: mpsc::Sender<MasterMessage>,
}

/// 已连接的Worker
///
/// 每个Worker的执行组集合和模块状态各自加锁，不同Worker之间互不竞争。
pub struct Worker {
    id: String,
    start_time: i64,
    last_connect_time: Mutex<DateTime<Utc>>,
    executing: Mutex<ExecutingGroups>,
    module_states: Mutex<BTreeMap<String, WorkerModuleState>>,
    session: Mutex<Option<SessionSender>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Worker {
    pub fn new(id: impl Into<String>, start_time: i64) -> Self {
        Self {
            id: id.into(),
            start_time,
            last_connect_time: Mutex::new(Utc::now()),
            executing: Mutex::new(ExecutingGroups::default()),
            module_states: Mutex::new(BTreeMap::new()),
            session: Mutex::new(None),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn start_time(&self) -> i64 {
        self.start_time
    }

    pub fn last_connect_time(&self) -> DateTime<Utc> {
        *lock(&self.last_connect_time)
    }

    pub fn touch(&self) {
        *lock(&self.last_connect_time) = Utc::now();
    }

    pub(crate) fn set_last_connect_time(&self, time: DateTime<Utc>) {
        *lock(&self.last_connect_time) = time;
    }

    /// 记录分配给该Worker的执行组
    pub fn add_executing_group(&self, module_name: &str, module_time: i64, group: Arc<ExecutionGroup>) {
        group.set_module_start_time(module_time);
        let base_id = group.base_id().to_string();
        let mut executing = lock(&self.executing);
        executing
            .by_module
            .entry(format!("{module_name}:{module_time}"))
            .or_default()
            .insert(base_id.clone());
        executing.by_base_id.insert(base_id, group);
    }

    /// 按执行组ID（可带尝试次数）查找
    pub fn executing_group(&self, group_id: &str) -> Option<Arc<ExecutionGroup>> {
        lock(&self.executing)
            .by_base_id
            .get(ExecutionGroup::base_id_of(group_id))
            .cloned()
    }

    pub fn executing_groups(&self) -> Vec<Arc<ExecutionGroup>> {
        lock(&self.executing).by_base_id.values().cloned().collect()
    }

    pub fn executing_group_ids(&self) -> Vec<String> {
        lock(&self.executing)
            .by_base_id
            .values()
            .map(|group| group.id())
            .collect()
    }

    pub fn executing_count(&self) -> usize {
        lock(&self.executing).by_base_id.len()
    }

    pub fn remove_executing_group(&self, group_id: &str) -> Option<Arc<ExecutionGroup>> {
        let mut executing = lock(&self.executing);
        let base_id = ExecutionGroup::base_id_of(group_id);
        let group = executing.by_base_id.remove(base_id)?;
        let key = group.module_name_and_time();
        if let Some(base_ids) = executing.by_module.get_mut(&key) {
            base_ids.remove(base_id);
            if base_ids.is_empty() {
                executing.by_module.remove(&key);
            }
        }
        Some(group)
    }

    /// 移除属于 `模块名:启动时间` 的全部执行组
    pub fn cancel_executing_groups(&self, module_name_and_time: &str) -> Vec<Arc<ExecutionGroup>> {
        let mut executing = lock(&self.executing);
        let Some(base_ids) = executing.by_module.remove(module_name_and_time) else {
            return Vec::new();
        };
        base_ids
            .iter()
            .filter_map(|base_id| executing.by_base_id.remove(base_id))
            .collect()
    }

    /// 移除属于某个作业的全部执行组
    pub fn remove_job_groups(&self, job_id: &str) -> Vec<Arc<ExecutionGroup>> {
        let group_ids: Vec<String> = lock(&self.executing)
            .by_base_id
            .values()
            .filter(|group| group.job_id() == job_id)
            .map(|group| group.base_id().to_string())
            .collect();
        group_ids
            .iter()
            .filter_map(|group_id| self.remove_executing_group(group_id))
            .collect()
    }

    pub fn module_state(&self, module_name: &str) -> Option<WorkerModuleState> {
        lock(&self.module_states).get(module_name).cloned()
    }

    pub fn module_states(&self) -> Vec<WorkerModuleState> {
        lock(&self.module_states).values().cloned().collect()
    }

    /// 修改模块状态镜像，不存在时先创建
    pub fn update_module_state<F>(&self, module_name: &str, update: F)
    where
        F: FnOnce(&mut WorkerModuleState),
    {
        if module_name.is_empty() {
            return;
        }
        let mut states = lock(&self.module_states);
        let state = states
            .entry(module_name.to_string())
            .or_insert_with(|| WorkerModuleState::new(module_name));
        update(state);
    }

    /// 设置当前会话
    ///
    /// 每个Worker只向最新打开的会话推送消息。旧会话的发送端被丢弃，
    /// 旧会话的接收端取完剩余消息后结束，返回被替换的会话ID。
    pub(crate) fn set_session(
        &self,
        session_id: u64,
        sender: mpsc::Sender<MasterMessage>,
    ) -> Option<u64> {
        let previous = lock(&self.session).replace(SessionSender { session_id, sender });
        let replaced = previous.map(|previous| previous.session_id);
        if let Some(replaced) = replaced {
            info!(worker_id = %self.id, session_id, replaced, "新会话替换旧会话");
        }
        replaced
    }

    /// 只清除仍是当前会话的发送端
    pub(crate) fn clear_session(&self, session_id: u64) {
        let mut session = lock(&self.session);
        if session.as_ref().is_some_and(|s| s.session_id == session_id) {
            *session = None;
        }
    }

    pub fn has_session(&self) -> bool {
        lock(&self.session).is_some()
    }

    /// 通过当前会话发送消息，不等待写端
    ///
    /// 没有会话、会话已关闭或缓冲区已满时丢弃消息并返回false。
    pub fn send_message(&self, message: MasterMessage) -> bool {
        match lock(&self.session).as_ref() {
            Some(session) => match session.sender.try_send(message) {
                Ok(()) => true,
                Err(mpsc::error::TrySendError::Full(message)) => {
                    warn!(
                        worker_id = %self.id,
                        session_id = session.session_id,
                        "会话消息缓冲区已满，丢弃消息: {:?}",
                        message
                    );
                    false
                }
                Err(mpsc::error::TrySendError::Closed(_)) => false,
            },
            None => {
                debug!(worker_id = %self.id, "Worker没有会话，丢弃消息");
                false
            }
        }
    }

    pub fn info(&self) -> WorkerInfo {
        WorkerInfo {
            id: self.id.clone(),
            start_time: self.start_time,
            connected: self.has_session(),
            last_connect_time: self.last_connect_time(),
            executing_group_ids: self.executing_group_ids(),
            module_states: self.module_states(),
        }
    }
}

impl std::fmt::Debug for Worker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Worker")
            .field("id", &self.id)
            .field("start_time", &self.start_time)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use batchhost_core::models::WorkerModuleStatus;

    fn group(job_id: &str, sequence_number: u32, module_name: &str) -> Arc<ExecutionGroup> {
        Arc::new(ExecutionGroup::new(job_id, sequence_number, "Wait", module_name, "consumer"))
    }

    #[test]
    fn test_lookup_ignores_attempt() {
        let worker = Worker::new("W1", 1);
        worker.add_executing_group("geo", 100, group("J1", 1, "geo"));

        assert!(worker.executing_group("J1-1-1").is_some());
        assert!(worker.executing_group("J1-1-7").is_some());
        assert_eq!(worker.executing_group_ids(), vec!["J1-1-1".to_string()]);

        let removed = worker.remove_executing_group("J1-1-2").unwrap();
        assert_eq!(removed.module_start_time(), 100);
        assert_eq!(worker.executing_count(), 0);
        assert!(worker.remove_executing_group("J1-1-1").is_none());
    }

    #[test]
    fn test_cancel_by_module_time() {
        let worker = Worker::new("W1", 1);
        worker.add_executing_group("geo", 100, group("J1", 1, "geo"));
        worker.add_executing_group("geo", 100, group("J1", 2, "geo"));
        worker.add_executing_group("maps", 200, group("J2", 1, "maps"));

        assert!(worker.cancel_executing_groups("geo:99").is_empty());
        let cancelled = worker.cancel_executing_groups("geo:100");
        assert_eq!(cancelled.len(), 2);
        assert_eq!(worker.executing_count(), 1);
        assert!(worker.executing_group("J2-1-1").is_some());
    }

    #[test]
    fn test_remove_job_groups() {
        let worker = Worker::new("W1", 1);
        worker.add_executing_group("geo", 100, group("J1", 1, "geo"));
        worker.add_executing_group("geo", 100, group("J2", 1, "geo"));
        assert_eq!(worker.remove_job_groups("J1").len(), 1);
        assert!(worker.executing_group("J2-1-1").is_some());
        assert!(worker.cancel_executing_groups("geo:100").len() == 1);
    }

    #[test]
    fn test_module_state_created_on_demand() {
        let worker = Worker::new("W1", 1);
        assert!(worker.module_state("geo").is_none());
        worker.update_module_state("geo", |state| {
            state.set_enabled(true);
            state.status = WorkerModuleStatus::Started;
            state.started_time = 5;
        });
        let state = worker.module_state("geo").unwrap();
        assert!(state.is_started());
        assert_eq!(state.started_time, 5);

        worker.update_module_state("", |state| state.enabled = true);
        assert_eq!(worker.module_states().len(), 1);
    }

    #[test]
    fn test_messages_require_current_session() {
        let worker = Worker::new("W1", 1);
        assert!(!worker.send_message(MasterMessage::security_result("1")));

        let (sender, mut receiver) = mpsc::channel(8);
        assert_eq!(worker.set_session(1, sender), None);
        assert!(worker.send_message(MasterMessage::security_result("2")));
        assert!(receiver.try_recv().is_ok());

        worker.clear_session(2);
        assert!(worker.has_session());
        worker.clear_session(1);
        assert!(!worker.has_session());
    }

    #[test]
    fn test_full_session_buffer_drops_messages() {
        let worker = Worker::new("W1", 1);
        let (sender, mut receiver) = mpsc::channel(2);
        worker.set_session(1, sender);

        assert!(worker.send_message(MasterMessage::security_result("1")));
        assert!(worker.send_message(MasterMessage::security_result("2")));
        assert!(!worker.send_message(MasterMessage::security_result("3")));

        assert!(receiver.try_recv().is_ok());
        assert!(worker.send_message(MasterMessage::security_result("4")));
    }

    #[tokio::test]
    async fn test_new_session_replaces_previous() {
        let worker = Worker::new("W1", 1);
        let (first_sender, mut first) = mpsc::channel(8);
        let (second_sender, mut second) = mpsc::channel(8);
        worker.set_session(1, first_sender);
        assert_eq!(worker.set_session(2, second_sender), Some(1));

        assert!(worker.send_message(MasterMessage::security_result("1")));
        assert!(first.recv().await.is_none());
        assert!(second.try_recv().is_ok());

        worker.clear_session(1);
        assert!(worker.has_session());
    }
}
