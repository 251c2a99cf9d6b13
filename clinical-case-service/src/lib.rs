pub mod config;
pub mod models;
pub mod service;

pub use config::{LogFormat, ServiceConfig, SessionBackend};
pub use models::*;
pub use service::{AppState, build_router, create_app};
