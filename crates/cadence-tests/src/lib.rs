//! Integration test crate for Cadence.
//!
//! This crate exists solely to hold cross-crate integration tests that
//! drive `StreamEngine` against the in-process device.

#[cfg(test)]
mod support;

#[cfg(test)]
mod streaming;

#[cfg(test)]
mod lifecycle;
