pub mod dto;
pub mod extractors;
pub mod handlers;
pub mod jwt;
pub mod middleware;
pub mod password;
pub mod repo;
pub mod revocation;

pub use extractors::AuthUser;
pub use handlers::{protected_routes, public_routes};
pub use middleware::require_auth;
