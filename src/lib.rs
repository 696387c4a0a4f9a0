pub mod app;
pub mod auth;
pub mod categories;
pub mod comments;
pub mod config;
pub mod error;
pub mod ids;
pub mod posts;
pub mod resolver;
pub mod state;
pub mod store;
pub mod validate;
