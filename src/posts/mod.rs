mod dto;
pub mod handlers;

pub use dto::PostResponse;
pub use handlers::{protected_routes, public_routes};
