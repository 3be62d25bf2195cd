//! File-backed session store
//!
//! ```text
//! sessions/
//! ├── .current                      # id of the active session
//! └── 20260314-150926-k3x9/
//!     ├── meta.json                 # Session metadata
//!     └── transcript.jsonl          # append-only message log
//! ```
//!
//! The store is the only writer of transcript files. A single controller
//! per process is assumed; there is no cross-process locking.

use std::cmp::Reverse;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::llm::Message;

use super::meta::{Session, is_valid_id};
use super::transcript;

const META_FILE: &str = "meta.json";
const TRANSCRIPT_FILE: &str = "transcript.jsonl";
const CURRENT_POINTER: &str = ".current";

/// Attempts at finding an unused id before giving up
const MAX_ID_ATTEMPTS: usize = 8;

/// Session store rooted at a sessions directory
#[derive(Debug, Clone)]
pub struct SessionStore {
    base_dir: PathBuf,
}

impl SessionStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    fn session_dir(&self, id: &str) -> Result<PathBuf> {
        if !is_valid_id(id) {
            return Err(Error::InvalidInput(format!("invalid session id '{}'", id)));
        }
        Ok(self.base_dir.join(id))
    }

    /// Path of a session's transcript file
    pub fn transcript_path(&self, id: &str) -> Result<PathBuf> {
        Ok(self.session_dir(id)?.join(TRANSCRIPT_FILE))
    }

    /// Allocate a new session and persist its metadata
    pub fn create(&self, title: &str, model: &str) -> Result<Session> {
        for _ in 0..MAX_ID_ATTEMPTS {
            let session = Session::new(title, model);
            let dir = self.session_dir(&session.id)?;

            fs::create_dir_all(&self.base_dir).map_err(|e| Error::persistence(&self.base_dir, e))?;
            match fs::create_dir(&dir) {
                Ok(()) => {
                    self.write_meta(&dir, &session)?;
                    info!(session_id = %session.id, model, "Created session");
                    return Ok(session);
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(Error::persistence(&dir, e)),
            }
        }
        Err(Error::Other(
            "could not allocate a unique session id".to_string(),
        ))
    }

    /// Load one session's metadata
    pub fn get(&self, id: &str) -> Result<Session> {
        let path = self.session_dir(id)?.join(META_FILE);
        let data = match fs::read_to_string(&path) {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(Error::SessionNotFound(id.to_string()));
            }
            Err(e) => return Err(Error::persistence(&path, e)),
        };
        Ok(serde_json::from_str(&data)?)
    }

    /// All sessions, newest first
    ///
    /// Directories whose metadata is missing or unreadable are skipped.
    pub fn list(&self) -> Result<Vec<Session>> {
        let entries = match fs::read_dir(&self.base_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(Error::persistence(&self.base_dir, e)),
        };

        let mut sessions = Vec::new();
        for entry in entries.flatten() {
            if !entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            match self.get(&name) {
                Ok(session) => sessions.push(session),
                Err(e) => debug!(entry = %name, error = %e, "Skipping unreadable session"),
            }
        }

        sessions.sort_by_key(|s| Reverse(s.created_at));
        Ok(sessions)
    }

    /// Append one message to a session's transcript
    pub fn append(&self, id: &str, message: &Message) -> Result<()> {
        let dir = self.session_dir(id)?;
        if !dir.is_dir() {
            return Err(Error::SessionNotFound(id.to_string()));
        }
        transcript::append_message(&dir.join(TRANSCRIPT_FILE), message)?;
        debug!(session_id = id, role = %message.role, bytes = message.content.len(), "Appended message");
        Ok(())
    }

    /// Remove a session's metadata and transcript together
    pub fn delete(&self, id: &str) -> Result<()> {
        let dir = self.session_dir(id)?;
        match fs::remove_dir_all(&dir) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(Error::SessionNotFound(id.to_string()));
            }
            Err(e) => return Err(Error::persistence(&dir, e)),
        }

        if self.current_id()?.as_deref() == Some(id) {
            let pointer = self.base_dir.join(CURRENT_POINTER);
            if let Err(e) = fs::remove_file(&pointer)
                && e.kind() != ErrorKind::NotFound
            {
                return Err(Error::persistence(&pointer, e));
            }
        }

        info!(session_id = id, "Deleted session");
        Ok(())
    }

    fn current_id(&self) -> Result<Option<String>> {
        let pointer = self.base_dir.join(CURRENT_POINTER);
        match fs::read_to_string(&pointer) {
            Ok(id) => {
                let id = id.trim();
                Ok((!id.is_empty()).then(|| id.to_string()))
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::persistence(&pointer, e)),
        }
    }

    /// The session recorded as active, if it still exists
    pub fn current(&self) -> Result<Option<Session>> {
        let Some(id) = self.current_id()? else {
            return Ok(None);
        };
        match self.get(&id) {
            Ok(session) => Ok(Some(session)),
            Err(Error::SessionNotFound(_)) | Err(Error::InvalidInput(_)) => {
                warn!(session_id = %id, "Current session pointer names a missing session");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Record `id` as the active session
    pub fn set_current(&self, id: &str) -> Result<()> {
        self.session_dir(id)?;
        fs::create_dir_all(&self.base_dir).map_err(|e| Error::persistence(&self.base_dir, e))?;
        let pointer = self.base_dir.join(CURRENT_POINTER);
        fs::write(&pointer, id).map_err(|e| Error::persistence(&pointer, e))
    }

    /// Replay a session's transcript in write order
    pub fn load_transcript(&self, id: &str) -> Result<Vec<Message>> {
        transcript::read_transcript(&self.transcript_path(id)?)
    }

    /// Rename a session
    pub fn update_title(&self, id: &str, title: &str) -> Result<Session> {
        let mut session = self.get(id)?;
        session.title = title.to_string();
        session.updated_at = Utc::now();
        self.write_meta(&self.session_dir(id)?, &session)?;
        Ok(session)
    }

    /// Write metadata through a temporary file so a crash never leaves half a file
    fn write_meta(&self, dir: &Path, session: &Session) -> Result<()> {
        let path = dir.join(META_FILE);
        let tmp = dir.join(format!("{}.tmp", META_FILE));
        let data = serde_json::to_string_pretty(session)?;
        fs::write(&tmp, data).map_err(|e| Error::persistence(&tmp, e))?;
        fs::rename(&tmp, &path).map_err(|e| Error::persistence(&path, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use tempfile::TempDir;

    fn store() -> (TempDir, SessionStore) {
        let dir = TempDir::new().unwrap();
        let store = SessionStore::new(dir.path().join("sessions"));
        (dir, store)
    }

    #[test]
    fn test_create_and_get() {
        let (_dir, store) = store();
        let session = store.create("First chat", "qwen3:8b").unwrap();
        let loaded = store.get(&session.id).unwrap();
        assert_eq!(loaded, session);
        assert!(store.base_dir().join(&session.id).join(META_FILE).exists());
    }

    #[test]
    fn test_get_missing_is_not_found() {
        let (_dir, store) = store();
        assert!(matches!(
            store.get("20200101-000000-abcd"),
            Err(Error::SessionNotFound(_))
        ));
    }

    #[test]
    fn test_list_empty_when_base_missing() {
        let (_dir, store) = store();
        assert!(store.list().unwrap().is_empty());
    }

    #[test]
    fn test_list_sorted_newest_first_and_skips_corrupt() {
        let (_dir, store) = store();
        let older = store.create("older", "m").unwrap();
        let newer = store.create("newer", "m").unwrap();

        // Force distinct creation times regardless of clock resolution
        let mut backdated = store.get(&older.id).unwrap();
        backdated.created_at = newer.created_at - Duration::hours(1);
        store
            .write_meta(&store.base_dir().join(&older.id), &backdated)
            .unwrap();

        let corrupt = store.base_dir().join("20200101-000000-zzzz");
        fs::create_dir_all(&corrupt).unwrap();
        fs::write(corrupt.join(META_FILE), "{ not json").unwrap();
        fs::create_dir_all(store.base_dir().join("no-meta")).unwrap();

        let ids: Vec<String> = store.list().unwrap().into_iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![newer.id, older.id]);
    }

    #[test]
    fn test_transcript_roundtrip() {
        let (_dir, store) = store();
        let session = store.create("chat", "m").unwrap();
        assert!(store.load_transcript(&session.id).unwrap().is_empty());

        let messages = vec![Message::user("Hi"), Message::assistant("Hello!")];
        for message in &messages {
            store.append(&session.id, message).unwrap();
        }
        assert_eq!(store.load_transcript(&session.id).unwrap(), messages);
    }

    #[test]
    fn test_append_to_missing_session_fails() {
        let (_dir, store) = store();
        assert!(matches!(
            store.append("20200101-000000-abcd", &Message::user("x")),
            Err(Error::SessionNotFound(_))
        ));
    }

    #[test]
    fn test_delete_removes_everything_and_clears_pointer() {
        let (_dir, store) = store();
        let session = store.create("chat", "m").unwrap();
        store.append(&session.id, &Message::user("Hi")).unwrap();
        store.set_current(&session.id).unwrap();

        store.delete(&session.id).unwrap();
        assert!(!store.base_dir().join(&session.id).exists());
        assert!(store.current().unwrap().is_none());
        assert!(matches!(store.delete(&session.id), Err(Error::SessionNotFound(_))));
    }

    #[test]
    fn test_delete_leaves_other_sessions() {
        let (_dir, store) = store();
        let keep = store.create("keep", "m").unwrap();
        let drop = store.create("drop", "m").unwrap();
        store.append(&keep.id, &Message::user("still here")).unwrap();

        store.delete(&drop.id).unwrap();
        assert_eq!(store.load_transcript(&keep.id).unwrap().len(), 1);
    }

    #[test]
    fn test_current_pointer() {
        let (_dir, store) = store();
        assert!(store.current().unwrap().is_none());

        let session = store.create("chat", "m").unwrap();
        store.set_current(&session.id).unwrap();
        assert_eq!(store.current().unwrap().map(|s| s.id), Some(session.id.clone()));

        fs::remove_dir_all(store.base_dir().join(&session.id)).unwrap();
        assert!(store.current().unwrap().is_none());
    }

    #[test]
    fn test_update_title() {
        let (_dir, store) = store();
        let session = store.create("New chat", "m").unwrap();
        let renamed = store.update_title(&session.id, "Rust lifetimes").unwrap();
        assert_eq!(renamed.title, "Rust lifetimes");
        assert!(renamed.updated_at >= session.updated_at);
        assert_eq!(store.get(&session.id).unwrap().title, "Rust lifetimes");
    }

    #[test]
    fn test_rejects_path_like_ids() {
        let (_dir, store) = store();
        assert!(matches!(store.get("../outside"), Err(Error::InvalidInput(_))));
        assert!(store.set_current("a/b").is_err());
    }
}
