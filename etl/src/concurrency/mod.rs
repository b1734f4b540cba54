//! Stream adapters shaping the flow between the source and the destination.
//!
//! [`rate`] suspends a producer once it reaches its per-second read ceiling and [`stream`]
//! groups items into time-or-count batches. Both are pull based: when they return
//! `Poll::Pending` the upstream cursor is simply not polled, which is how backpressure reaches
//! MongoDB.

pub mod rate;
pub mod stream;
