//! Durable workflow storage
//!
//! [`FileWorkflowStore`] implements the
//! [`WorkflowStore`](civic_application::WorkflowStore) port on the local
//! filesystem so instances survive restarts and can be resumed.

mod file_store;

pub use file_store::FileWorkflowStore;
