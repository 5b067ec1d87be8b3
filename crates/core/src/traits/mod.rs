pub mod events;
pub mod properties;
pub mod security;
pub mod store;

pub use events::ModuleEventListener;
pub use properties::{ConfigPropertyStore, UserGroupStore, DEFAULT_ENVIRONMENT};
pub use security::{SecurityService, SecurityServiceFactory};
pub use store::{ExecutionGroupSource, JobStore, StatisticsSink};
