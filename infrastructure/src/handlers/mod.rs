//! Domain handler adapters
//!
//! Implementations of the [`DomainHandler`](civic_application::DomainHandler)
//! port:
//!
//! | Adapter | Transport | Use |
//! |---------|-----------|-----|
//! | [`HttpDomainHandler`] | JSON over HTTP (`http-handlers` feature) | Production |
//! | [`LoopbackDomainHandler`] | In-process echo | `--dry-run`, demos |

#[cfg(feature = "http-handlers")]
mod http;
mod loopback;

#[cfg(feature = "http-handlers")]
pub use http::HttpDomainHandler;
pub use loopback::LoopbackDomainHandler;
