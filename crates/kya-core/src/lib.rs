pub mod config;
pub mod cursor;
pub mod datastore;
pub mod error;
pub mod escalation;
pub mod feed;
pub mod gateway;
pub mod io;
pub mod notify;
pub mod paths;
pub mod suggestion;
pub mod tray;

pub use error::{KyaError, Result};
