//! Settings, logging and the notification bus shared by the collection
//! crates. Nothing here knows about SQL or query makers.

pub mod config;
pub mod error;
pub mod events;
pub mod logging;

pub use error::{Error, Result};
