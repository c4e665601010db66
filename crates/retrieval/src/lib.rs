//! Semantic context retrieval for planner prompts and tool discovery.
//!
//! Documents (conversation turns, scripts, tool results, preferences) are
//! indexed per session and searched either by embedding similarity or by
//! keyword overlap; see [`index::RetrievalIndex`].

pub mod document;
pub mod index;

pub use document::Document;
pub use index::{Embedder, IndexStats, RetrievalIndex, SearchResult};
