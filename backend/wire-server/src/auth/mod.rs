pub mod password;
pub mod service;
pub mod tokens;
pub mod validators;

pub use service::{AuthResponse, AuthService, LoginRequest, SignupRequest};
pub use tokens::Claims;
