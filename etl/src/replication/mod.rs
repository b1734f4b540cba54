//! Extraction from the source collection.
//!
//! - [`scan`] - governed, bounded snapshot of a collection
//! - [`tail`] - filtered and parsed change-log stream of a collection
//! - [`retry`] - restart points and backoff of a failing tail

pub mod retry;
pub mod scan;
pub mod tail;
