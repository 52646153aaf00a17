//! Background tasks for the auth service.
//!
//! - `key_rotation` - Periodically rotates signing keys and prunes revocations

pub mod key_rotation;

pub use key_rotation::{spawn_key_rotation, RotationTaskHandle};
