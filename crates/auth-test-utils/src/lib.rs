//! # Auth Test Utilities
//!
//! Shared test utilities for the auth service.
//!
//! This crate provides:
//! - Fixtures that wire the token and session services over the in-memory
//!   store, with a seeded user and cheap Argon2 parameters
//! - Server test harness (TestAuthServer for E2E tests)
//! - Custom assertions (TokenAssertions trait)
//!
//! ## Usage
//!
//! ```rust,ignore
//! use auth_test_utils::*;
//!
//! #[tokio::test]
//! async fn test_example() -> anyhow::Result<()> {
//!     let services = TestServices::new().await?;
//!     let token = services.tokens.create_access_token(services.user_id).await?;
//!
//!     token.assert_valid_jwt()
//!          .assert_token_type("access")
//!          .assert_for_user(services.user_id);
//!     Ok(())
//! }
//! ```

pub mod assertions;
pub mod fixtures;
pub mod server_harness;

pub use assertions::*;
pub use fixtures::*;
pub use server_harness::*;
