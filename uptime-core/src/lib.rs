pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod events;
pub mod incidents;
pub mod logging;
pub mod models;
pub mod notify;
pub mod pipeline;
pub mod queue;
pub mod redis_conn;
pub mod shutdown;
pub mod stats;
pub mod store;

pub use config::Config;
pub use error::{Error, Result};
