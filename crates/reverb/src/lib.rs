// Library exports for the CLI binary and integration tests.

// ===== Core verification engine =====
pub mod canonical;
pub mod config;
pub mod contract;
pub mod diff;
pub mod error;
pub mod replay;
pub mod report;
pub mod route;
pub mod session;
pub mod template;
pub mod tolerance;

pub use error::VerifyError;
