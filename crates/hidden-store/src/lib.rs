//! # hidden-store
//!
//! Document store client used by the HIDDEN messaging core.
//!
//! The crate defines the [`DocumentStore`] contract (collection queries,
//! atomic write batches, a change feed) and ships two implementations:
//! [`MemoryStore`] for tests and embedded use, and [`SqliteStore`] which
//! keeps JSON documents in a local SQLite file.  [`subscribe`] turns any
//! store into live queries that re-emit their full result on every change.

pub mod client;
pub mod clock;
pub mod database;
pub mod document;
pub mod memory;
pub mod migrations;
pub mod subscription;

mod error;

pub use client::DocumentStore;
pub use database::SqliteStore;
pub use document::{Change, Direction, Document, FieldValue, Fields, Query, Write, WriteBatch};
pub use error::{Result, StoreError};
pub use memory::MemoryStore;
pub use subscription::{subscribe, Subscription};
