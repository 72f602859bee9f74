//! Integration test crate for the Cutline render pipeline.
//!
//! This crate exists solely to hold cross-crate integration tests.
//! It depends on the index and render crates to verify they work together.

#[cfg(test)]
mod concurrency;

#[cfg(test)]
mod pipeline;
