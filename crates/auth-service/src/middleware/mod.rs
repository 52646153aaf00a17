pub mod auth;

pub use auth::require_access_token;
