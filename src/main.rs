//! sitecraft server
//!
//! ```text
//! sitecraft --config sitecraft.toml --bind 127.0.0.1:3000
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::{info, warn};

use sitecraft::agent::{AgentRuntime, TranscriptStore};
use sitecraft::config::AppConfig;
use sitecraft::quota::InMemoryQuota;
use sitecraft::search::{HttpSearch, SearchProvider};
use sitecraft::storage::LocalStorage;
use sitecraft::studio::Studio;
use sitecraft::telemetry::{init_tracing, shutdown_tracing};
use sitecraft::tools::builtin::builtin_registry;
use sitecraft::tools::{ToolServices, ENTRY_FILE};
use sitecraft::transport::{serve, AppState, RoomHub, RoomLimiters};
use sitecraft::versioning::VersionStore;

#[derive(Parser, Debug)]
#[command(name = "sitecraft")]
#[command(about = "LLM agents that build, deploy and refine static websites")]
#[command(version)]
struct Args {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Address to listen on (overrides the config file)
    #[arg(short, long)]
    bind: Option<SocketAddr>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let args = Args::parse();
    let config = AppConfig::load(args.config.as_deref())?;
    init_tracing(&config.telemetry)?;

    let env = |key: &str| std::env::var(key).ok().filter(|v| !v.is_empty());

    let storage = Arc::new(LocalStorage::new(&config.storage.root)?);
    let versions = Arc::new(
        VersionStore::new(storage.clone(), config.versions.retention_cap).with_live_file(ENTRY_FILE),
    );
    let search: Option<Arc<dyn SearchProvider>> = match env(&config.search.api_key_env) {
        Some(key) => Some(Arc::new(HttpSearch::new(
            config.search.endpoint.clone(),
            key,
            Duration::from_secs(config.search.timeout_secs),
        ))),
        None => {
            warn!(env = %config.search.api_key_env, "No search API key; web_search disabled");
            None
        }
    };
    let services = Arc::new(ToolServices::new(storage, versions, search));

    let settings = config.llm.settings(env);
    if settings.api_key.is_none() {
        warn!(env = %config.llm.api_key_env, provider = ?settings.provider, "No LLM API key in environment");
    }
    let mut runtime = AgentRuntime::new(
        Arc::new(settings),
        builtin_registry(),
        config.agent.runtime_config(),
    );
    if let Some(dir) = &config.agent.transcripts_dir {
        runtime = runtime.with_transcripts(Arc::new(TranscriptStore::new(dir)?));
    }

    let quota = Arc::new(InMemoryQuota::new(config.quota.default_credits));
    let studio = Arc::new(Studio::new(Arc::new(runtime), services, quota));
    let state = AppState::new(
        studio,
        Arc::new(RoomHub::new()),
        RoomLimiters::new(config.server.rate_limit_burst, config.server.rate_limit_per_sec)
            .with_idle_ttl(Duration::from_secs(config.server.rate_limit_idle_secs)),
    );

    let addr = match args.bind {
        Some(addr) => addr,
        None => config.server.bind.parse()?,
    };
    info!(
        model = %config.llm.model,
        storage = %config.storage.root.display(),
        retention_cap = ?config.versions.retention_cap,
        "Starting sitecraft"
    );
    serve(addr, state).await?;

    shutdown_tracing();
    Ok(())
}
