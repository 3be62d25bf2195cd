//! Session metadata entity

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Alphabet for the random id suffix
const ID_SUFFIX_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// Length of the random id suffix
const ID_SUFFIX_LEN: usize = 4;

/// Metadata for one conversation, stored as `meta.json`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    /// `YYYYMMDD-HHMMSS-xxxx`
    pub id: String,
    pub title: String,
    /// Model the session was started with
    pub model: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    /// Create session metadata with a freshly generated id
    pub fn new(title: impl Into<String>, model: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: generate_id(now),
            title: title.into(),
            model: model.into(),
            created_at: now,
            updated_at: now,
        }
    }
}

/// Generate a session id from a timestamp plus a random suffix
pub fn generate_id(now: DateTime<Utc>) -> String {
    let mut rng = rand::thread_rng();
    let suffix: String = (0..ID_SUFFIX_LEN)
        .map(|_| ID_SUFFIX_ALPHABET[rng.gen_range(0..ID_SUFFIX_ALPHABET.len())] as char)
        .collect();
    format!("{}-{}", now.format("%Y%m%d-%H%M%S"), suffix)
}

/// Whether `id` is safe to use as a directory name under the sessions root
pub fn is_valid_id(id: &str) -> bool {
    !id.is_empty()
        && !id.starts_with('.')
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}
