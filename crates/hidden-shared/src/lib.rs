//! Identifiers, data model and constants shared by every HIDDEN crate.

pub mod constants;
pub mod error;
pub mod models;
pub mod types;

pub use error::ModelError;
pub use models::*;
pub use types::{ChatId, MessageId, UserId};
