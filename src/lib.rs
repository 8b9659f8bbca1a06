pub mod api;
pub mod config;
pub mod engine;
pub mod error;
pub mod server;
pub mod source;
