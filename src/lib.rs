//! cdc-ingest - change-feed ingestion reader
//!
//! Tails a replica set's change stream and hands events to one consumer,
//! with an optional crash-durable overflow queue for full-sync windows.

pub mod disk_queue;
pub mod feed;
pub mod observability;
pub mod position;
pub mod reader;
