//! `oplog` — an operation-based CRDT journal for decentralized dataset version history.
//!
//! The primary entry point for most callers is [`book::Book`], which layers dataset,
//! branch, and commit semantics over a [`logstore::Journal`] of [`log::Log`] trees.

pub mod book;
pub mod crypto;
pub mod error;
pub mod log;
pub mod logstore;
pub mod name;
pub mod op;
pub mod reference;
pub mod state;
pub mod wire;

pub use book::{Book, Event, EventPublisher};
pub use error::OplogError;
pub use log::Log;
pub use logstore::{BlobStore, Journal, Logstore};
pub use op::{Model, Op, OpType};
pub use reference::Ref;
