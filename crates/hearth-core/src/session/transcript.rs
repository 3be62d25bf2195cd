//! Transcript codec
//!
//! A transcript is an append-only JSONL file: one `Message` object per
//! line, in write order.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, ErrorKind, Write};
use std::path::Path;

use crate::error::{Error, Result};
use crate::llm::Message;

/// Encode one message as a single JSON line (without the newline)
pub fn encode_line(message: &Message) -> Result<String> {
    Ok(serde_json::to_string(message)?)
}

/// Decode one transcript line
pub fn decode_line(line: &str) -> serde_json::Result<Message> {
    serde_json::from_str(line)
}

/// Append one message to the transcript at `path`, creating the file if needed
pub fn append_message(path: &Path, message: &Message) -> Result<()> {
    let line = encode_line(message)?;
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| Error::persistence(path, e))?;

    writeln!(file, "{}", line).map_err(|e| Error::persistence(path, e))?;
    file.flush().map_err(|e| Error::persistence(path, e))
}

/// Replay the transcript at `path`
///
/// A missing file is an empty transcript. Blank lines are skipped; any
/// other undecodable line fails the whole read.
pub fn read_transcript(path: &Path) -> Result<Vec<Message>> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(Error::persistence(path, e)),
    };

    let mut messages = Vec::new();
    for (index, line) in BufReader::new(file).lines().enumerate() {
        let line = line.map_err(|e| Error::persistence(path, e))?;
        if line.trim().is_empty() {
            continue;
        }
        let message = decode_line(&line).map_err(|source| Error::TranscriptDecode {
            path: path.to_path_buf(),
            line: index + 1,
            source,
        })?;
        messages.push(message);
    }
    Ok(messages)
}
