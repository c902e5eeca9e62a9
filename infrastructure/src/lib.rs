//! Infrastructure layer for civicmind
//!
//! This crate contains adapters that implement the ports defined
//! in the application layer, including configuration file loading,
//! domain handler transports and the durable workflow store.

pub mod catalogue;
pub mod config;
pub mod handlers;
pub mod logging;
pub mod store;

// Re-export commonly used types
pub use catalogue::{GENERAL_DOMAIN, builtin_domains, builtin_workflows};
pub use config::{
    ConfigLoader, ConfigValidationError, FileClassifierConfig, FileConfig, FileHealthConfig,
    FileLoggingConfig, FileOutputConfig, FileOutputFormat, FileRouterConfig, FileWorkflowConfig,
};
#[cfg(feature = "http-handlers")]
pub use handlers::HttpDomainHandler;
pub use handlers::LoopbackDomainHandler;
pub use logging::JsonlEventLogger;
pub use store::FileWorkflowStore;
