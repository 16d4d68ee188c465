/*!
 * Policy Module
 * Sandbox policy documents: schema, layered loading and storage
 */

pub mod loader;
pub mod store;
pub mod types;

pub use loader::{PolicyLoader, PolicyLoaderConfig};
pub use store::{DocumentList, PolicyStore};
pub use types::*;
