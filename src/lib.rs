pub mod api;
pub mod client;
pub mod config;
pub mod error;
pub mod security;
pub mod tokens;
pub mod users;
pub mod utils;

// Crate version exposed for runtime queries
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
