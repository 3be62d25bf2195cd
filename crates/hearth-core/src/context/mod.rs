//! Context budget management
//!
//! - Token estimation over message lists
//! - Compaction of old turns into a summary
//! - The adaptive context-window ladder

pub mod compaction;
pub mod ladder;
pub mod tokens;

pub use compaction::{Compacted, CompactionResult, compact, needs_compaction};
pub use ladder::{ContextLadder, TIERS};
pub use tokens::estimate_tokens;
