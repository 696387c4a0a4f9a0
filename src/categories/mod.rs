mod dto;
pub mod handlers;

pub use dto::CategoryResponse;
pub use handlers::{protected_routes, public_routes};
