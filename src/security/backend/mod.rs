/*!
 * Syscall Backend
 * Every OS side effect of sandbox construction goes through here
 */

#[cfg(target_os = "linux")]
mod linux;
pub mod manager;
pub mod simulation;
pub mod traits;
pub mod types;

#[cfg(target_os = "linux")]
pub use linux::LinuxBackend;
pub use manager::BackendManager;
pub use simulation::{SimulatedOp, SimulationBackend};
pub use traits::SyscallBackend;
#[cfg(test)]
pub use traits::MockSyscallBackend;
pub use types::*;
