//! Append-only log of answered questions, one JSON object per line.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ChatRecord {
    pub timestamp: String,
    pub question: String,
    pub answer: String,
}

impl ChatRecord {
    pub fn new(question: impl Into<String>, answer: impl Into<String>) -> Self {
        Self { timestamp: chrono::Local::now().to_rfc3339(), question: question.into(), answer: answer.into() }
    }
}

pub trait HistorySink {
    fn append(&self, record: &ChatRecord) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct JsonlHistory {
    path: PathBuf,
}

impl JsonlHistory {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path { &self.path }

    /// All records in file order. A missing file is an empty history; any
    /// line that is not a valid record fails the whole read.
    pub fn load(&self) -> Result<Vec<ChatRecord>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let content = fs::read_to_string(&self.path)
            .with_context(|| format!("reading history {}", self.path.display()))?;
        content
            .lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .map(|(i, line)| {
                serde_json::from_str::<ChatRecord>(line)
                    .with_context(|| format!("{}:{}: malformed history record", self.path.display(), i + 1))
            })
            .collect()
    }
}

impl HistorySink for JsonlHistory {
    fn append(&self, record: &ChatRecord) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let mut line = serde_json::to_string(record)?;
        line.push('\n');
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("opening history {}", self.path.display()))?;
        file.write_all(line.as_bytes())?;
        debug!(path = %self.path.display(), "appended history record");
        Ok(())
    }
}
