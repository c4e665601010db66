//! Per-session working memory and the on-disk project layout.
//!
//! [`store::SessionStore`] holds all mutable session state (conversation,
//! project assets, preferences, tool-execution log, workflow cursor);
//! [`project::ProjectLayout`] owns the directory tree a project's artifacts
//! land in.

pub mod project;
pub mod store;

pub use project::{MediaItem, MediaKind, ProjectLayout, ProjectManifest};
pub use store::{
    AssetKind, AssetRecord, ConversationTurn, ProjectAssets, Role, Session, SessionStore,
    WorkflowState,
};
