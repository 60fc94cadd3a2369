//! Polling/reconciliation engine for a networked audio monitor.
//!
//! The engine owns one UDP device connection and keeps a [`Snapshot`]
//! of up to 64 channel records plus five scalar properties.  Reads
//! never block on polling: they return the latest merged snapshot and
//! kick background workers when a refresh is due.  Acknowledged
//! control commands patch the cached snapshot in place instead of
//! re-polling the whole channel table.
//!
//! [`Snapshot`]: nemo_proto::model::Snapshot

pub mod cache;
pub mod control;
pub mod device;
pub mod engine;
pub mod error;
pub mod errors;
pub mod poller;

pub use engine::Engine;
pub use error::EngineError;
