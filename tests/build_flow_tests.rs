//! Integration tests for the build flow
//!
//! A scripted model drives the full planner → structurer → file writer tree
//! through the studio, with events delivered over a room.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use sitecraft::agent::{AgentConfig, AgentRole, AgentRuntime, AgentSession, SessionConfig, SessionError, SessionOutcome};
use sitecraft::llm::{LlmResponse, Message, ScriptedClient, ScriptedFactory, ToolInvocation};
use sitecraft::quota::{InMemoryQuota, QuotaLedger};
use sitecraft::storage::{FileStorage, MemoryStorage};
use sitecraft::studio::Studio;
use sitecraft::tools::builtin::builtin_registry;
use sitecraft::tools::{BuildState, ToolContext, ToolRegistry, ToolServices, ENTRY_FILE};
use sitecraft::transport::{ControlMessage, ProgressEvent, RecordingSink, RoomHub, RoomSubscription};
use sitecraft::versioning::VersionStore;
use tokio_util::sync::CancellationToken;

fn studio(responses: Vec<LlmResponse>, credits: u64) -> (Arc<Studio>, Arc<InMemoryQuota>) {
    let runtime = Arc::new(AgentRuntime::new(
        Arc::new(ScriptedFactory::new(ScriptedClient::new(responses))),
        builtin_registry(),
        AgentConfig::default(),
    ));
    let storage = Arc::new(MemoryStorage::new());
    let versions = Arc::new(VersionStore::new(storage.clone(), Some(10)).with_live_file(ENTRY_FILE));
    let services = Arc::new(ToolServices::new(storage, versions, None));
    let quota = Arc::new(InMemoryQuota::new(Some(credits)));
    (Arc::new(Studio::new(runtime, services, quota.clone())), quota)
}

fn start(prompt: &str) -> ControlMessage {
    ControlMessage::StartProject {
        user_id: "u1".into(),
        prompt: prompt.into(),
        images: vec![],
    }
}

fn bakery_script() -> Vec<LlmResponse> {
    vec![
        LlmResponse::tool_calls(vec![("p1", "start_project", json!({"name": "Corner Bakery"}))]),
        LlmResponse::tool_calls(vec![("p2", "delegate_structure", json!({"task": "Bakery site"}))]),
        LlmResponse::tool_calls(vec![(
            "s1",
            "delegate_file",
            json!({"path": "index.html", "brief": "Landing page"}),
        )]),
        LlmResponse::tool_calls(vec![(
            "f1",
            "write_file",
            json!({"path": "index.html", "content": "<h1>Corner Bakery</h1>"}),
        )]),
        LlmResponse::text("Wrote index.html"),
        LlmResponse::text("index.html"),
        LlmResponse::tool_calls(vec![("p3", "deploy_site", json!({}))]),
        LlmResponse::text("Your bakery site is live"),
    ]
}

/// Collect room events up to and including the first terminal event
async fn until_terminal(subscription: &mut RoomSubscription) -> Vec<ProgressEvent> {
    let mut events = Vec::new();
    while let Some(event) = subscription.recv().await {
        let done = event.is_terminal();
        events.push(event);
        if done {
            break;
        }
    }
    events
}

/// A full build reaches every client in the room and ends deployed
#[tokio::test]
async fn test_build_deploys_and_broadcasts_to_room() {
    let (studio, quota) = studio(bakery_script(), 2);
    let hub = Arc::new(RoomHub::new());
    let mut first = hub.join_room("room");
    let mut second = hub.join_room("room");

    let handle = studio
        .handle("room", start("A bakery site"), hub.sink("room"))
        .await
        .expect("build should start");
    handle.await.unwrap();

    let events = tokio::time::timeout(Duration::from_secs(5), until_terminal(&mut first))
        .await
        .unwrap();
    assert_eq!(
        events.last(),
        Some(&ProgressEvent::WebsiteDeployed {
            slug: "corner-bakery".into()
        })
    );
    assert!(events.contains(&ProgressEvent::ProjectStarted {
        slug: "corner-bakery".into()
    }));
    assert_eq!(events.iter().filter(|e| e.is_terminal()).count(), 1);

    let mirrored = tokio::time::timeout(Duration::from_secs(5), until_terminal(&mut second))
        .await
        .unwrap();
    assert_eq!(mirrored, events);

    let services = studio.services();
    assert_eq!(
        services.storage.read_file("corner-bakery/index.html").await.unwrap(),
        "<h1>Corner Bakery</h1>"
    );
    assert_eq!(services.versions.get_current("corner-bakery").await.unwrap(), Some(1));
    assert!(services.versions.project("corner-bakery").await.unwrap().deployed);
    assert_eq!(studio.last_slug("room").as_deref(), Some("corner-bakery"));
    assert_eq!(quota.get_user_profile("u1").await.unwrap().available_credits, 1);
}

/// Undo after a build restores nothing older than the first snapshot
#[tokio::test]
async fn test_undo_after_single_snapshot_reports_nothing() {
    let (studio, _) = studio(bakery_script(), 1);
    let sink = Arc::new(RecordingSink::new());
    studio
        .handle("room", start("A bakery site"), sink.clone())
        .await
        .unwrap()
        .await
        .unwrap();

    studio
        .handle("room", ControlMessage::UndoCodeChange { slug: None }, sink.clone())
        .await;
    let Some(ProgressEvent::UndoResult(outcome)) = sink.events().last().cloned() else {
        panic!("expected an undo result");
    };
    assert!(!outcome.success);
    assert_eq!(outcome.message, "Nothing to undo");
}

/// Credits run out after the first build
#[tokio::test]
async fn test_second_build_without_credits_is_rejected() {
    let script = vec![
        LlmResponse::tool_calls(vec![("p1", "start_project", json!({"name": "First"}))]),
        LlmResponse::text("Started"),
        LlmResponse::text("never used"),
    ];
    let (studio, quota) = studio(script, 1);
    let sink = Arc::new(RecordingSink::new());

    studio
        .handle("room", start("First site"), sink.clone())
        .await
        .unwrap()
        .await
        .unwrap();
    assert_eq!(quota.get_user_profile("u1").await.unwrap().available_credits, 0);

    let rejected = Arc::new(RecordingSink::new());
    assert!(studio.handle("room", start("Second site"), rejected.clone()).await.is_none());
    let [ProgressEvent::Error { error }] = &rejected.events()[..] else {
        panic!("expected a single error event");
    };
    assert!(error.contains("Insufficient credits"));
}

/// A tool nobody handles fails the session instead of looping
#[tokio::test]
async fn test_unknown_tool_fails_session() {
    let storage = Arc::new(MemoryStorage::new());
    let versions = Arc::new(VersionStore::new(storage.clone(), None));
    let sink = Arc::new(RecordingSink::new());
    let ctx = ToolContext::new(
        "root",
        AgentRole::Planner,
        Arc::new(ToolServices::new(storage, versions, None)),
        Arc::new(BuildState::new(None)),
        sink.clone(),
        CancellationToken::new(),
    );
    let registry = ToolRegistry::new();

    let invocation = ToolInvocation {
        id: "t1".into(),
        name: "unknown_tool".into(),
        input: json!({}),
    };
    assert!(registry.dispatch(&invocation, &ctx).await.blocks.is_empty());

    let client = ScriptedClient::new(vec![
        LlmResponse::tool_calls(vec![("t1", "unknown_tool", json!({}))]),
        LlmResponse::text("never reached"),
    ]);
    let report = AgentSession::new(ctx, None, Arc::new(client.clone()), registry, SessionConfig::default())
        .run(vec![Message::user("Build a site")])
        .await;

    assert!(matches!(
        report.outcome,
        SessionOutcome::Failed(SessionError::UnknownTool(ref name)) if name == "unknown_tool"
    ));
    assert_eq!(client.remaining(), 1);
    assert_eq!(sink.terminal_events().len(), 1);
}
