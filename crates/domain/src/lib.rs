//! Core entities (§3), error taxonomy (§7), and the repository abstraction shared
//! by every other component crate in this workspace.

pub mod entities;
pub mod error;
pub mod store;

pub use entities::*;
pub use error::RemediationError;
pub use store::{InMemoryStore, Store, WorkflowRunDelta};
