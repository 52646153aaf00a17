pub mod session_service;
pub mod token_service;

pub use session_service::SessionService;
pub use token_service::{RotationOutcome, TokenService};
