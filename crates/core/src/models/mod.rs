pub mod business_application;
pub mod execution_group;
pub mod message;
pub mod module;
pub mod permission;
pub mod protocol;
pub mod range;
pub mod worker;

pub use business_application::{
    is_geometry_type, AttributeDefinition, BusinessApplication, GeometryConfig,
    ParameterDefinition,
};
pub use execution_group::ExecutionGroup;
pub use message::{MasterMessage, WorkerMessage};
pub use module::{ModuleAction, ModuleControlAction, ModuleEvent, ModuleInfo, ModuleStatus};
pub use permission::{ModulePermissions, ResourcePermission};
pub use protocol::{
    GroupAssignment, GroupExecutionStatistics, GroupRequests, GroupResults, GroupSpecification,
    JobCounters, OpaqueData, OpaqueRequest,
};
pub use range::RangeSet;
pub use worker::{WorkerInfo, WorkerModuleState, WorkerModuleStatus};
