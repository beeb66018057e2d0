pub mod config;
pub mod db;
pub mod error;
pub mod logging;
pub mod models;
pub mod scheduler;
pub mod store;
pub mod tracker;

pub use error::{Error, Result};
