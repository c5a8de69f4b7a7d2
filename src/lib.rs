//! GLMP — global-to-local memory pointer networks for task-oriented dialogue.
//!
//! Encodes a conversation history together with a structured knowledge base
//! into a joint memory, scores every memory slot with a *global pointer*,
//! and generates a response by decoding a sketch and filling its slot tags
//! with entities copied from memory via per-step *local pointers*. The
//! knowledge memory is refined either by stacked graph attention over the
//! KB adjacency or by a gated graph-recurrent propagation pass.
//!
//! # Public API
//!
//! ```ignore
//! use glmp::config::{GlmpConfig, RunSettings};
//! let model = GlmpConfig::new().init::<B>(lang.n_words(), &settings, &device);
//! ```

pub mod checkpoint;
pub mod config;
pub mod data;
pub mod inference;
pub mod metrics;
pub mod model;
pub mod rng;
pub mod training;
