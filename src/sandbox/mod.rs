/*!
 * Sandbox Module
 * Per-spawn sandbox construction: resolution, planning, mounting, namespaces
 */

pub mod context;
pub mod debug;
pub mod dec;
pub mod executor;
pub mod identity;
pub mod namespace;
pub mod planner;
pub mod resolver;
pub mod shared;
pub mod types;

// Re-export for convenience
pub use context::{EngineConfig, SandboxEngineContext, SpawnSession};
pub use debug::DebugSandbox;
pub use dec::{DecBatch, DecPolicyManager};
pub use executor::MountExecutor;
pub use identity::{AppIdentity, AppIdentityBuilder, ExtInfo, HspList};
pub use namespace::{NamespaceController, NamespaceState, RootMode};
pub use planner::{MountPlanner, PlanReport};
pub use resolver::{ParamCache, PathResolver, ResolveMode, StaticParameters, SystemParameters};
pub use shared::{DataGroupQueue, LockState, QueueOutcome, QueueState, SharedMountManager};
pub use types::{ExecMode, MountOp, SymlinkOp};
