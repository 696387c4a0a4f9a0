mod dto;
pub mod handlers;

pub use dto::CommentResponse;
pub use handlers::protected_routes;
