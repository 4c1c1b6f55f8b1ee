//! Wire events exchanged with room clients
//!
//! Every frame is `{"event": <name>, "data": {...}}`.

use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::refiner::PatchOperation;

/// Outbound event pushed to a room
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ProgressEvent {
    #[serde(rename = "progress")]
    Progress { message: String },
    #[serde(rename = "project_started")]
    ProjectStarted { slug: String },
    #[serde(rename = "websiteDeployed")]
    WebsiteDeployed { slug: String },
    #[serde(rename = "error")]
    Error { error: String },
    #[serde(rename = "undoResult")]
    UndoResult(HistoryOutcome),
    #[serde(rename = "redoResult")]
    RedoResult(HistoryOutcome),
    #[serde(rename = "completed")]
    Completed { message: String },
    #[serde(rename = "aborted")]
    Aborted { message: String },
}

impl ProgressEvent {
    pub fn progress(message: impl Into<String>) -> Self {
        ProgressEvent::Progress {
            message: message.into(),
        }
    }

    pub fn error(error: impl Into<String>) -> Self {
        ProgressEvent::Error { error: error.into() }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ProgressEvent::Progress { .. } => "progress",
            ProgressEvent::ProjectStarted { .. } => "project_started",
            ProgressEvent::WebsiteDeployed { .. } => "websiteDeployed",
            ProgressEvent::Error { .. } => "error",
            ProgressEvent::UndoResult(_) => "undoResult",
            ProgressEvent::RedoResult(_) => "redoResult",
            ProgressEvent::Completed { .. } => "completed",
            ProgressEvent::Aborted { .. } => "aborted",
        }
    }

    /// Events that end a build or refinement request
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ProgressEvent::WebsiteDeployed { .. }
                | ProgressEvent::Error { .. }
                | ProgressEvent::Completed { .. }
                | ProgressEvent::Aborted { .. }
        )
    }
}

/// Payload of `undoResult` / `redoResult`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryOutcome {
    pub success: bool,
    pub message: String,
    /// Restored document, present on success
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

/// Image attached to a build request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageInput {
    pub media_type: String,
    /// Base64 payload
    pub data: String,
}

/// Inbound control message
#[derive(Debug, Clone, PartialEq)]
pub enum ControlMessage {
    StartProject {
        user_id: String,
        prompt: String,
        images: Vec<ImageInput>,
    },
    AbortProjectCreation,
    UndoCodeChange { slug: Option<String> },
    RedoCodeChange { slug: Option<String> },
    RefineProject {
        slug: Option<String>,
        user_id: Option<String>,
        instructions: Option<String>,
        operations: Option<Vec<PatchOperation>>,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum ControlError {
    #[error("Malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("Unknown event: {0}")]
    UnknownEvent(String),
}

#[derive(Deserialize)]
struct Envelope {
    event: String,
    #[serde(default)]
    data: Value,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct StartData {
    #[serde(alias = "user_id")]
    user_id: String,
    prompt: String,
    #[serde(default)]
    images: Vec<ImageInput>,
}

#[derive(Deserialize, Default)]
struct SlugData {
    #[serde(default)]
    slug: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RefineData {
    #[serde(default)]
    slug: Option<String>,
    #[serde(default, alias = "user_id")]
    user_id: Option<String>,
    #[serde(default)]
    instructions: Option<String>,
    #[serde(default)]
    operations: Option<Vec<PatchOperation>>,
}

impl ControlMessage {
    pub fn parse(frame: &str) -> Result<Self, ControlError> {
        let envelope: Envelope = serde_json::from_str(frame)?;
        let data = match envelope.data {
            Value::Null => Value::Object(Default::default()),
            other => other,
        };
        Ok(match envelope.event.as_str() {
            "startProject" => {
                let d: StartData = serde_json::from_value(data)?;
                ControlMessage::StartProject {
                    user_id: d.user_id,
                    prompt: d.prompt,
                    images: d.images,
                }
            }
            "abortProjectCreation" => ControlMessage::AbortProjectCreation,
            "undoCodeChange" => ControlMessage::UndoCodeChange {
                slug: serde_json::from_value::<SlugData>(data)?.slug,
            },
            "redoCodeChange" => ControlMessage::RedoCodeChange {
                slug: serde_json::from_value::<SlugData>(data)?.slug,
            },
            "refineProject" => {
                let d: RefineData = serde_json::from_value(data)?;
                ControlMessage::RefineProject {
                    slug: d.slug,
                    user_id: d.user_id,
                    instructions: d.instructions,
                    operations: d.operations,
                }
            }
            other => return Err(ControlError::UnknownEvent(other.to_string())),
        })
    }

    pub fn name(&self) -> &'static str {
        match self {
            ControlMessage::StartProject { .. } => "startProject",
            ControlMessage::AbortProjectCreation => "abortProjectCreation",
            ControlMessage::UndoCodeChange { .. } => "undoCodeChange",
            ControlMessage::RedoCodeChange { .. } => "redoCodeChange",
            ControlMessage::RefineProject { .. } => "refineProject",
        }
    }
}

/// Destination for the events of one request
pub trait ProgressSink: Send + Sync {
    fn emit(&self, event: ProgressEvent);
}

/// Sink that keeps every event, for tests and transcripts
#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<ProgressEvent>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ProgressEvent> {
        self.events
            .lock()
            .map(|e| e.clone())
            .unwrap_or_default()
    }

    pub fn terminal_events(&self) -> Vec<ProgressEvent> {
        self.events().into_iter().filter(ProgressEvent::is_terminal).collect()
    }
}

impl ProgressSink for RecordingSink {
    fn emit(&self, event: ProgressEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_outbound_wire_format() {
        let frame = serde_json::to_value(ProgressEvent::WebsiteDeployed { slug: "bakery".into() }).unwrap();
        assert_eq!(frame, json!({"event": "websiteDeployed", "data": {"slug": "bakery"}}));

        let frame = serde_json::to_value(ProgressEvent::UndoResult(HistoryOutcome {
            success: false,
            message: "Nothing to undo".into(),
            code: None,
        }))
        .unwrap();
        assert_eq!(
            frame,
            json!({"event": "undoResult", "data": {"success": false, "message": "Nothing to undo"}})
        );
    }

    #[test]
    fn test_parse_control_messages() {
        let start = ControlMessage::parse(r#"{"event":"startProject","data":{"userId":"u1","prompt":"A bakery site"}}"#).unwrap();
        assert_eq!(
            start,
            ControlMessage::StartProject {
                user_id: "u1".into(),
                prompt: "A bakery site".into(),
                images: vec![],
            }
        );
        assert_eq!(
            ControlMessage::parse(r#"{"event":"abortProjectCreation"}"#).unwrap(),
            ControlMessage::AbortProjectCreation
        );
        assert_eq!(
            ControlMessage::parse(r#"{"event":"undoCodeChange","data":{"slug":"bakery"}}"#).unwrap(),
            ControlMessage::UndoCodeChange { slug: Some("bakery".into()) }
        );
        assert_eq!(
            ControlMessage::parse(r#"{"event":"redoCodeChange","data":null}"#).unwrap(),
            ControlMessage::RedoCodeChange { slug: None }
        );
    }

    #[test]
    fn test_parse_refine_with_operations() {
        let msg = ControlMessage::parse(
            r#"{"event":"refineProject","data":{"slug":"bakery","operations":[{"type":"remove","selector":"footer"}]}}"#,
        )
        .unwrap();
        let ControlMessage::RefineProject { operations: Some(ops), .. } = msg else {
            panic!("expected refine with operations");
        };
        assert_eq!(ops[0], PatchOperation::Remove { selector: "footer".into() });
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!(
            ControlMessage::parse(r#"{"event":"launchRockets"}"#),
            Err(ControlError::UnknownEvent(_))
        ));
        assert!(matches!(ControlMessage::parse("not json"), Err(ControlError::Malformed(_))));
        assert!(ControlMessage::parse(r#"{"event":"startProject","data":{}}"#).is_err());
    }
}
