/*!
 * Permissions Module
 * Permission name indexing and per-app grant sets
 */

pub mod registry;
pub mod set;

pub use registry::PermissionRegistry;
pub use set::{Grants, PermissionSet};
