pub mod auth_handler;
pub mod health;
pub mod jwks_handler;
pub mod metrics;

pub use health::health_check;
