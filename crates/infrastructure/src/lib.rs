//! # Batchhost Infrastructure
//!
//! 外部协作者的内存实现：作业存储、待分发执行组队列、配置属性存储、
//! 用户组存储、带缓存的安全服务工厂以及执行统计。
//! 单机部署和测试直接使用这些实现，生产环境可替换为持久化实现。

pub mod config_store;
pub mod group_queue;
pub mod job_store;
pub mod security;
pub mod statistics;
pub mod user_groups;

pub use config_store::InMemoryConfigPropertyStore;
pub use group_queue::InMemoryGroupQueue;
pub use job_store::InMemoryJobStore;
pub use security::{CachingSecurityServiceFactory, GroupSecurityService};
pub use statistics::{ApplicationStatistics, InMemoryStatisticsSink};
pub use user_groups::InMemoryUserGroupStore;
