use async_trait::async_trait;

use crate::models::ModuleEvent;
use crate::HostResult;

/// 模块生命周期事件监听器
///
/// 注册表同步依次通知监听器，监听器返回的错误只会被记录。
#[async_trait]
pub trait ModuleEventListener: Send + Sync {
    async fn module_changed(&self, event: &ModuleEvent) -> HostResult<()>;
}
