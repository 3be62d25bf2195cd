//! System prompt assembly from personality files
//!
//! The personality directory holds optional markdown sections. Present,
//! non-empty sections are joined in a fixed order; the memory section
//! comes from the memory store so it can be trimmed to a token budget.
//! `BOOTSTRAP.md` doubles as the first-run marker.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::memory::{MEMORY_FILE, MemoryStore};

/// Section files in prompt order
pub const SECTIONS: [&str; 7] = [
    "IDENTITY.md",
    "SOUL.md",
    "USER.md",
    MEMORY_FILE,
    "BOOT.md",
    "HEARTBEAT.md",
    BOOTSTRAP_FILE,
];

/// First-run marker and onboarding instructions
pub const BOOTSTRAP_FILE: &str = "BOOTSTRAP.md";

const SECTION_SEPARATOR: &str = "\n\n---\n\n";

const DEFAULT_IDENTITY: &str = "# Identity\n\nYou are Hearth, a friendly assistant running locally on the user's machine. Be concise, warm and direct.\n";

const DEFAULT_BOOTSTRAP: &str = "# First conversation\n\nThis is your first conversation with the user. Introduce yourself in one or two sentences, ask what they would like to be called, and what they want help with.\n";

/// Whether a language needs an explicit instruction
pub fn is_non_english(language: &str) -> bool {
    let language = language.trim();
    !language.is_empty() && !language.eq_ignore_ascii_case("english")
}

#[derive(Debug, Clone)]
pub struct PromptAssembler {
    dir: PathBuf,
    language: String,
    /// Token budget for the memory section; `None` leaves memory out
    memory_tokens: Option<usize>,
}

impl PromptAssembler {
    pub fn new(personality_dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: personality_dir.into(),
            language: String::new(),
            memory_tokens: None,
        }
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = language.into();
        self
    }

    pub fn with_memory(mut self, max_tokens: Option<usize>) -> Self {
        self.memory_tokens = max_tokens;
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn language(&self) -> &str {
        &self.language
    }

    pub fn set_language(&mut self, language: impl Into<String>) {
        self.language = language.into();
    }

    fn read_section(&self, name: &str) -> Result<Option<String>> {
        if name == MEMORY_FILE {
            return match self.memory_tokens {
                Some(max) => Ok(Some(MemoryStore::new(&self.dir).for_prompt(max)?)),
                None => Ok(None),
            };
        }

        let path = self.dir.join(name);
        match fs::read_to_string(&path) {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::persistence(&path, e)),
        }
    }

    /// Build the system prompt from the current files
    pub fn assemble(&self) -> Result<String> {
        let mut sections = Vec::new();
        for name in SECTIONS {
            if let Some(content) = self.read_section(name)? {
                let content = content.trim();
                if !content.is_empty() {
                    sections.push(content.to_string());
                }
            }
        }

        if sections.is_empty() {
            sections.push(DEFAULT_IDENTITY.trim().to_string());
        }

        let mut prompt = String::new();
        if is_non_english(&self.language) {
            prompt.push_str(&format!(
                "IMPORTANT: Always respond in {lang}. All your messages, questions, and responses must be in {lang}.\n\n",
                lang = self.language.trim()
            ));
        }
        prompt.push_str(&sections.join(SECTION_SEPARATOR));

        debug!(sections = sections.len(), bytes = prompt.len(), "Assembled system prompt");
        Ok(prompt)
    }

    /// Write default personality files that do not exist yet
    pub fn init_defaults(&self) -> Result<()> {
        fs::create_dir_all(&self.dir).map_err(|e| Error::persistence(&self.dir, e))?;
        let identity = self.dir.join("IDENTITY.md");
        if !identity.exists() {
            fs::write(&identity, DEFAULT_IDENTITY).map_err(|e| Error::persistence(&identity, e))?;
        }
        Ok(())
    }

    pub fn has_bootstrap(&self) -> bool {
        self.dir.join(BOOTSTRAP_FILE).is_file()
    }

    /// Create the first-run marker
    pub fn write_bootstrap(&self) -> Result<()> {
        fs::create_dir_all(&self.dir).map_err(|e| Error::persistence(&self.dir, e))?;
        let path = self.dir.join(BOOTSTRAP_FILE);
        fs::write(&path, DEFAULT_BOOTSTRAP).map_err(|e| Error::persistence(&path, e))
    }

    /// Remove the first-run marker; missing is fine
    pub fn delete_bootstrap(&self) -> Result<()> {
        let path = self.dir.join(BOOTSTRAP_FILE);
        match fs::remove_file(&path) {
            Ok(()) => {
                info!("Bootstrap complete");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::persistence(&path, e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_sections_joined_in_order() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("USER.md"), "Name: Sam\n").unwrap();
        fs::write(dir.path().join("IDENTITY.md"), "You are Hearth.\n").unwrap();
        fs::write(dir.path().join("SOUL.md"), "   \n").unwrap();

        let prompt = PromptAssembler::new(dir.path()).assemble().unwrap();
        assert_eq!(prompt, "You are Hearth.\n\n---\n\nName: Sam");
    }

    #[test]
    fn test_default_identity_when_empty() {
        let dir = TempDir::new().unwrap();
        let prompt = PromptAssembler::new(dir.path()).assemble().unwrap();
        assert!(prompt.starts_with("# Identity"));
    }

    #[test]
    fn test_language_instruction_prepended() {
        let dir = TempDir::new().unwrap();
        let assembler = PromptAssembler::new(dir.path()).with_language("German");
        let prompt = assembler.assemble().unwrap();
        assert!(prompt.starts_with("IMPORTANT: Always respond in German."));

        let english = PromptAssembler::new(dir.path()).with_language("English");
        assert!(!english.assemble().unwrap().contains("IMPORTANT"));
    }

    #[test]
    fn test_memory_included_only_when_enabled() {
        let dir = TempDir::new().unwrap();
        MemoryStore::new(dir.path()).append("Likes tea").unwrap();

        let without = PromptAssembler::new(dir.path()).assemble().unwrap();
        assert!(!without.contains("Likes tea"));

        let with = PromptAssembler::new(dir.path())
            .with_memory(Some(2000))
            .assemble()
            .unwrap();
        assert!(with.contains("- Likes tea"));
    }

    #[test]
    fn test_bootstrap_marker_lifecycle() {
        let dir = TempDir::new().unwrap();
        let assembler = PromptAssembler::new(dir.path().join("personality"));
        assert!(!assembler.has_bootstrap());

        assembler.write_bootstrap().unwrap();
        assert!(assembler.has_bootstrap());
        assert!(assembler.assemble().unwrap().contains("# First conversation"));

        assembler.delete_bootstrap().unwrap();
        assert!(!assembler.has_bootstrap());
        assembler.delete_bootstrap().unwrap();
    }

    #[test]
    fn test_init_defaults_keeps_existing_identity() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("IDENTITY.md"), "Custom").unwrap();
        let assembler = PromptAssembler::new(dir.path());
        assembler.init_defaults().unwrap();
        assert_eq!(fs::read_to_string(dir.path().join("IDENTITY.md")).unwrap(), "Custom");
    }

    #[test]
    fn test_is_non_english() {
        assert!(is_non_english("Japanese"));
        assert!(!is_non_english("english"));
        assert!(!is_non_english(""));
    }
}
