//! Conversation transcripts
//!
//! Every finished session (root or delegated) can be written to disk as one
//! JSON file so a build can be inspected after the fact.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::session::SessionReport;
use super::AgentRole;
use crate::llm::{Message, Role, Usage};

/// A saved session transcript
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transcript {
    pub id: String,
    pub parent_id: Option<String>,
    pub role: AgentRole,
    pub model: String,
    pub saved_at: DateTime<Utc>,
    /// First user message of the conversation
    pub task: String,
    /// succeeded / failed / aborted
    pub outcome: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub iterations: usize,
    pub tool_calls: usize,
    pub usage: Usage,
    pub files_written: Vec<String>,
    pub messages: Vec<Message>,
}

impl Transcript {
    pub fn from_report(report: &SessionReport) -> Self {
        let task = report
            .conversation
            .iter()
            .find(|m| m.role == Role::User)
            .map(Message::text)
            .unwrap_or_default();
        let error = match &report.outcome {
            super::SessionOutcome::Failed(e) => Some(e.to_string()),
            _ => None,
        };
        Self {
            id: report.session_id.clone(),
            parent_id: report.parent_id.clone(),
            role: report.role,
            model: report.model.clone(),
            saved_at: Utc::now(),
            task,
            outcome: report.outcome.label().to_string(),
            error,
            iterations: report.iterations,
            tool_calls: report.tool_calls,
            usage: report.usage,
            files_written: report.files_written.clone(),
            messages: report.conversation.clone(),
        }
    }
}

/// Summary of a transcript for listing
#[derive(Debug, Clone, Serialize)]
pub struct TranscriptSummary {
    pub id: String,
    pub parent_id: Option<String>,
    pub role: AgentRole,
    pub task: String,
    pub outcome: String,
    pub saved_at: DateTime<Utc>,
}

/// Directory of transcript files, one `{id}.json` per session
pub struct TranscriptStore {
    base_dir: PathBuf,
}

impl TranscriptStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> std::io::Result<Self> {
        let base_dir = base_dir.into();
        std::fs::create_dir_all(&base_dir)?;
        Ok(Self { base_dir })
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub async fn save(&self, report: &SessionReport) -> std::io::Result<PathBuf> {
        let transcript = Transcript::from_report(report);
        let path = self.transcript_path(&transcript.id);
        let json = serde_json::to_string_pretty(&transcript)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        tokio::fs::write(&path, json).await?;
        Ok(path)
    }

    pub async fn load(&self, id: &str) -> std::io::Result<Transcript> {
        load_from_path(&self.transcript_path(id)).await
    }

    /// All transcripts, newest first
    pub async fn list(&self) -> std::io::Result<Vec<TranscriptSummary>> {
        let mut summaries = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.base_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().map(|e| e == "json").unwrap_or(false) {
                if let Ok(t) = load_from_path(&path).await {
                    summaries.push(TranscriptSummary {
                        id: t.id,
                        parent_id: t.parent_id,
                        role: t.role,
                        task: truncate(&t.task, 50),
                        outcome: t.outcome,
                        saved_at: t.saved_at,
                    });
                }
            }
        }
        summaries.sort_by(|a, b| b.saved_at.cmp(&a.saved_at));
        Ok(summaries)
    }

    pub async fn delete(&self, id: &str) -> std::io::Result<()> {
        tokio::fs::remove_file(self.transcript_path(id)).await
    }

    fn transcript_path(&self, id: &str) -> PathBuf {
        self.base_dir.join(format!("{}.json", id))
    }
}

async fn load_from_path(path: &Path) -> std::io::Result<Transcript> {
    let json = tokio::fs::read_to_string(path).await?;
    serde_json::from_str(&json).map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
}

/// Truncate on a char boundary, appending "..."
fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        s.to_string()
    } else {
        let head: String = s.chars().take(max_chars.saturating_sub(3)).collect();
        format!("{}...", head)
    }
}
