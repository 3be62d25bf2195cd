//! Long-term memory kept in `MEMORY.md`
//!
//! Facts are markdown bullets grouped under dated headings:
//!
//! ```text
//! # Memory
//!
//! ## 2026-03-14
//! - Prefers answers in metric units
//! ```

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::{Local, NaiveDate};
use tracing::debug;

use crate::error::{Error, Result};

pub const MEMORY_FILE: &str = "MEMORY.md";

const EMPTY_MEMORY: &str = "# Memory\n";
const BULLET: &str = "- ";

#[derive(Debug, Clone)]
pub struct MemoryStore {
    path: PathBuf,
}

impl MemoryStore {
    /// Memory file inside the personality directory
    pub fn new(personality_dir: &Path) -> Self {
        Self {
            path: personality_dir.join(MEMORY_FILE),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Raw file contents, or an empty memory document
    pub fn read(&self) -> Result<String> {
        match fs::read_to_string(&self.path) {
            Ok(content) => Ok(content),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(EMPTY_MEMORY.to_string()),
            Err(e) => Err(Error::persistence(&self.path, e)),
        }
    }

    fn write(&self, content: &str) -> Result<()> {
        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir).map_err(|e| Error::persistence(dir, e))?;
        }
        fs::write(&self.path, content).map_err(|e| Error::persistence(&self.path, e))
    }

    /// Remembered facts, oldest first
    pub fn entries(&self) -> Result<Vec<String>> {
        Ok(self
            .read()?
            .lines()
            .filter_map(|line| line.strip_prefix(BULLET))
            .map(str::to_string)
            .collect())
    }

    /// Remember a fact under today's heading
    pub fn append(&self, fact: &str) -> Result<()> {
        self.append_on(fact, Local::now().date_naive())
    }

    /// Remember a fact under the heading for `date`
    pub fn append_on(&self, fact: &str, date: NaiveDate) -> Result<()> {
        let fact = fact.trim();
        if fact.is_empty() {
            return Err(Error::InvalidInput("nothing to remember".to_string()));
        }

        let mut content = self.read()?;
        let heading = format!("## {}", date.format("%Y-%m-%d"));
        if !content.lines().any(|line| line.trim() == heading) {
            if !content.ends_with('\n') {
                content.push('\n');
            }
            content.push('\n');
            content.push_str(&heading);
            content.push('\n');
        } else if !content.ends_with('\n') {
            content.push('\n');
        }
        content.push_str(BULLET);
        content.push_str(fact);
        content.push('\n');

        self.write(&content)?;
        debug!(path = %self.path.display(), "Remembered fact");
        Ok(())
    }

    /// Drop every fact containing `keyword` (case-insensitive)
    ///
    /// Returns the number of facts removed.
    pub fn forget(&self, keyword: &str) -> Result<usize> {
        let keyword = keyword.trim().to_lowercase();
        if keyword.is_empty() {
            return Err(Error::InvalidInput("nothing to forget".to_string()));
        }

        let content = self.read()?;
        let mut removed = 0;
        let mut kept = String::with_capacity(content.len());
        for line in content.lines() {
            if line.starts_with(BULLET) && line.to_lowercase().contains(&keyword) {
                removed += 1;
                continue;
            }
            kept.push_str(line);
            kept.push('\n');
        }

        if removed > 0 {
            self.write(&kept)?;
        }
        Ok(removed)
    }

    /// Memory section for the system prompt, newest facts first to fit
    ///
    /// Returns an empty string when nothing is remembered.
    pub fn for_prompt(&self, max_tokens: usize) -> Result<String> {
        let entries = self.entries()?;
        let budget = max_tokens.saturating_mul(4);

        let mut lines: Vec<String> = Vec::new();
        let mut used = 0;
        for entry in entries.iter().rev() {
            let line = format!("{}{}\n", BULLET, entry);
            if used + line.len() > budget {
                break;
            }
            used += line.len();
            lines.push(line);
        }

        if lines.is_empty() {
            return Ok(String::new());
        }
        lines.reverse();
        Ok(format!("# Memory\n\n{}", lines.concat()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn date(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, d).unwrap()
    }

    #[test]
    fn test_read_missing_returns_empty_document() {
        let dir = TempDir::new().unwrap();
        let store = MemoryStore::new(dir.path());
        assert_eq!(store.read().unwrap(), "# Memory\n");
        assert!(store.entries().unwrap().is_empty());
    }

    #[test]
    fn test_append_groups_by_date() {
        let dir = TempDir::new().unwrap();
        let store = MemoryStore::new(dir.path());
        store.append_on("Likes tea", date(14)).unwrap();
        store.append_on("Lives in Oslo", date(14)).unwrap();
        store.append_on("Has a cat", date(15)).unwrap();

        let content = store.read().unwrap();
        assert_eq!(content.matches("## 2026-03-14").count(), 1);
        assert_eq!(content.matches("## 2026-03-15").count(), 1);
        assert_eq!(
            store.entries().unwrap(),
            vec!["Likes tea", "Lives in Oslo", "Has a cat"]
        );
    }

    #[test]
    fn test_append_rejects_blank() {
        let dir = TempDir::new().unwrap();
        let store = MemoryStore::new(dir.path());
        assert!(store.append("   ").is_err());
    }

    #[test]
    fn test_forget_is_case_insensitive() {
        let dir = TempDir::new().unwrap();
        let store = MemoryStore::new(dir.path());
        store.append_on("Likes TEA", date(14)).unwrap();
        store.append_on("Drinks tea at noon", date(14)).unwrap();
        store.append_on("Has a cat", date(14)).unwrap();

        assert_eq!(store.forget("tea").unwrap(), 2);
        assert_eq!(store.entries().unwrap(), vec!["Has a cat"]);
        assert_eq!(store.forget("dog").unwrap(), 0);
    }

    #[test]
    fn test_for_prompt_empty_when_nothing_remembered() {
        let dir = TempDir::new().unwrap();
        let store = MemoryStore::new(dir.path());
        assert_eq!(store.for_prompt(2000).unwrap(), "");
    }

    #[test]
    fn test_for_prompt_keeps_newest_within_budget() {
        let dir = TempDir::new().unwrap();
        let store = MemoryStore::new(dir.path());
        store.append_on(&"old ".repeat(10), date(1)).unwrap();
        store.append_on("newest fact", date(2)).unwrap();

        // 5 tokens = 20 chars: only the short, newest line fits
        let prompt = store.for_prompt(5).unwrap();
        assert_eq!(prompt, "# Memory\n\n- newest fact\n");
    }
}
