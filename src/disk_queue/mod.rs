//! Local overflow queue for change events
//!
//! A named, append-ordered, crash-durable sequence of byte records. The
//! reader spills events here while the consumer is not allowed to see them
//! yet, and drains them back in append order later.
//!
//! # Guarantees
//!
//! - Records are read back in exactly the order they were appended
//! - Every frame carries a CRC32 of its payload
//! - A read is only consumed once committed, so a crash re-delivers rather
//!   than loses
//! - Corrupt frames inside the committed region are FATAL

mod errors;
mod frame;
mod options;
mod queue;

pub use errors::{DiskQueueError, DiskQueueErrorCode, DiskQueueResult, Severity};
pub use options::DiskQueueOptions;
pub use queue::DiskQueue;
