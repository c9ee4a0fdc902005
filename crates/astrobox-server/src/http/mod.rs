//! HTTP API: JSON endpoints, SSE progress streams and file downloads.

pub mod auth;
pub mod handlers;
pub mod rate_limit;
pub mod routes;
pub mod security;
pub mod server;
pub mod types;


pub use server::HttpServer;
