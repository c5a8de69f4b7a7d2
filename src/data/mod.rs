//! Dataset loading, vocabulary, and memory tensorization.

pub mod edge_pairs;
pub mod memory;
pub mod transcript;
pub mod vocab;
