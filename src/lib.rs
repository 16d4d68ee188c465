/*!
 * Appspawn Sandbox Library
 * Builds the per-app mount namespace of a freshly spawned application
 */

pub mod core;
pub mod monitoring;
pub mod permissions;
pub mod policy;
pub mod sandbox;
pub mod security;

// Re-exports
pub use crate::core::errors::*;
pub use monitoring::{init_tracing, spawn_span};
pub use permissions::{Grants, PermissionRegistry, PermissionSet};
pub use policy::{PolicyDocument, PolicyKind, PolicyStore};
pub use sandbox::{
    AppIdentity, EngineConfig, MountExecutor, MountPlanner, SandboxEngineContext, SpawnSession,
};
pub use security::{BackendManager, SimulationBackend, SyscallBackend};
