//! JSON file persistence for conversations

use scribe_agent::{Error, HistoryStore, Result};
use scribe_ai::Turn;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

const TITLE_MAX_CHARS: usize = 60;

/// One saved conversation, as written to `<id>.json`
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HistoryFile {
    id: String,
    title: String,
    updated_at: i64,
    turns: Vec<Turn>,
}

/// Summary row for `--list`
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryInfo {
    pub id: String,
    pub title: String,
    pub updated_at: i64,
    pub turn_count: usize,
}

impl HistoryInfo {
    /// Format the last update for display
    pub fn updated_at_display(&self) -> String {
        chrono::DateTime::from_timestamp_millis(self.updated_at)
            .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "unknown".to_string())
    }
}

/// Stores each conversation in its own JSON file
#[derive(Debug, Clone)]
pub struct FileHistoryStore {
    dir: PathBuf,
}

impl FileHistoryStore {
    /// Default history directory
    pub fn default_dir() -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("scribe")
            .join("history")
    }

    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File for `id`. Ids that could name a path outside the store are rejected.
    fn path_for(&self, id: &str) -> Result<PathBuf> {
        let invalid = id.is_empty()
            || id.contains("..")
            || id.contains(['/', '\\'])
            || Path::new(id).is_absolute();
        if invalid {
            return Err(Error::Persistence(format!("Invalid history id: {:?}", id)));
        }
        Ok(self.dir.join(format!("{}.json", id)))
    }

    /// Saved conversations, newest first. Unreadable files are skipped.
    pub fn list(&self) -> std::io::Result<Vec<HistoryInfo>> {
        if !self.dir.exists() {
            return Ok(vec![]);
        }

        let mut histories = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|s| s.to_str()) != Some("json") {
                continue;
            }
            match read_file(&path) {
                Ok(file) => histories.push(HistoryInfo {
                    id: file.id,
                    title: file.title,
                    updated_at: file.updated_at,
                    turn_count: file.turns.len(),
                }),
                Err(e) => tracing::debug!("Skipping {}: {}", path.display(), e),
            }
        }

        histories.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(histories)
    }
}

impl HistoryStore for FileHistoryStore {
    fn load_history(&self, id: &str) -> Result<Vec<Turn>> {
        let path = self.path_for(id)?;
        if !path.exists() {
            return Ok(vec![]);
        }
        read_file(&path).map(|file| file.turns)
    }

    fn save_history(&self, id: &str, turns: &[Turn]) -> Result<String> {
        let path = self.path_for(id)?;
        fs::create_dir_all(&self.dir).map_err(persistence)?;

        let file = HistoryFile {
            id: id.to_string(),
            title: title_for(turns),
            updated_at: chrono::Utc::now().timestamp_millis(),
            turns: turns.to_vec(),
        };
        let content = serde_json::to_string_pretty(&file).map_err(persistence)?;

        // Write then rename so a crash never leaves half a file
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, content).map_err(persistence)?;
        fs::rename(&tmp, &path).map_err(persistence)?;

        Ok(file.title)
    }
}

fn read_file(path: &Path) -> Result<HistoryFile> {
    let content = fs::read_to_string(path).map_err(persistence)?;
    serde_json::from_str(&content).map_err(persistence)
}

fn persistence(e: impl std::fmt::Display) -> Error {
    Error::Persistence(e.to_string())
}

/// First prompt of the conversation, cut to [`TITLE_MAX_CHARS`]
fn title_for(turns: &[Turn]) -> String {
    let Some(first) = turns.first() else {
        return "Untitled".to_string();
    };
    let prompt = first.user_input.prompt().trim();
    let line = prompt.lines().next().unwrap_or_default();
    if line.chars().count() > TITLE_MAX_CHARS {
        let cut: String = line.chars().take(TITLE_MAX_CHARS - 3).collect();
        format!("{}...", cut.trim_end())
    } else if line.is_empty() {
        "Untitled".to_string()
    } else {
        line.to_string()
    }
}
