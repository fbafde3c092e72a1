pub mod api;
pub mod config;
pub mod error;
pub mod gateway;
pub mod session;
pub mod transport;
pub mod utils;

pub use error::ApiError;
pub use gateway::Gateway;
pub use transport::{ApiRequest, ApiResponse};

// Crate version exposed for runtime queries
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
