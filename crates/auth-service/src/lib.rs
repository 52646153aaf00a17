//! Auth service library
//!
//! Issues and validates RS256 JWTs for user sessions, and rotates the RSA
//! signing keys behind them.
//!
//! # Modules
//!
//! - `config` - Service configuration
//! - `crypto` - Claims, JWT sign/verify, password hashing
//! - `keys` - In-memory key set (`KeyManager`)
//! - `errors` - Error types
//! - `handlers` / `routes` / `middleware` - HTTP surface
//! - `models` - Data models
//! - `repositories` - Key and user stores
//! - `services` - Token and session logic
//! - `tasks` - Background key rotation

pub mod config;
pub mod crypto;
pub mod errors;
pub mod handlers;
pub mod keys;
pub mod middleware;
pub mod models;
pub mod observability;
pub mod repositories;
pub mod routes;
pub mod services;
pub mod tasks;
