//! reposync Test & Validation Infrastructure
//!
//! Source and destination repository fixtures, store fault injection, and
//! the end-to-end transfer scenarios and property tests built on them.

pub mod fault;
pub mod harness;
pub mod proptest_transfer;


pub use fault::{CancelAtMonitor, FaultyNodeStore};
pub use harness::{Destination, InboundRecorder, SourceRepo};
