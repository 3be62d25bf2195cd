//! Session persistence
//!
//! - Session metadata entity and id generation
//! - Transcript codec (one JSON message per line)
//! - File-backed store with a current-session pointer

mod meta;
mod store;
pub mod transcript;

pub use meta::{Session, generate_id, is_valid_id};
pub use store::SessionStore;
