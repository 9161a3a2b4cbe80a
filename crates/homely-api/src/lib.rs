// homely-api: Async Rust client for the Homely cloud SDK API (REST + event stream)

pub mod auth;
pub mod client;
pub mod config;
pub mod error;
pub mod stream;
pub mod types;

pub use client::HomelyClient;
pub use config::ApiConfig;
pub use error::Error;
pub use stream::{StreamEvent, StreamHandle};
