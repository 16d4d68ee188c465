/*!
 * Security Module
 * Syscall backends behind every mount, namespace and DEC side effect
 */

pub mod backend;

// Re-export for convenience
pub use backend::{BackendManager, SimulationBackend, SyscallBackend};
