//! # threadpost-core
//!
//! Pure logic for threadpost (no I/O, instant tests).
//!
//! This crate holds the decisions the node makes without touching disk or
//! network:
//! - [`admission`] - which checks a thread block must pass, given what is
//!   known locally
//! - [`batch`] - outbox paging and per-destination grouping
//!
//! The node crate performs the actual I/O and feeds the results back in.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod admission;
pub mod batch;

pub use admission::{gate, AdmissionError, Gate};
pub use batch::{partition_by_peer, FlushReport, PageCursor, DEFAULT_PAGE_SIZE};
