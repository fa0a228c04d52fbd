//! treewire: lossless-tree synchronization for multi-tool refactoring.
//!
//! Parses source files into lossless trees (every byte of the input is
//! retained, so printing reproduces it exactly), ships them between
//! processes as structural diffs over a compact framed protocol, and
//! verifies before anything is written back that printing a modified tree
//! re-parses to the same structure.
//!
//! See [`tree`] for the node model, [`json`] for the demo language family,
//! and [`rpc`] for the transfer machinery.

pub mod error;
pub mod json;
pub mod rpc;
pub mod tree;

pub use error::{Result, WireError};
