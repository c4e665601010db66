use std::sync::Arc;
use std::time::Duration;

use cf_domain::config::Config;
use cf_providers::{HttpTransport, LlmClient, LlmTransport};
use cf_retrieval::RetrievalIndex;
use cf_sessions::SessionStore;
use cf_tools::{register_builtin_tools, ToolExecutor, ToolRegistry};

use crate::runtime::cancel::ControlMap;
use crate::runtime::planner::Planner;
use crate::runtime::TurnMap;
use crate::stream::bus::EventBus;

/// Shared application state passed to all handlers.
///
/// Fields are grouped by concern:
/// - **Core services** — config, LLM client, retrieval index
/// - **Session state** — session store
/// - **Tools** — registry and executor
/// - **Streaming** — event bus
/// - **Runtime** — planner, control tokens, active turns
#[derive(Clone)]
pub struct AppState {
    // ── Core services ─────────────────────────────────────────────
    pub config: Arc<Config>,
    pub llm: Arc<LlmClient>,
    pub retrieval: Arc<RetrievalIndex>,

    // ── Session state ─────────────────────────────────────────────
    pub sessions: Arc<SessionStore>,

    // ── Tools ─────────────────────────────────────────────────────
    pub registry: Arc<ToolRegistry>,
    pub executor: Arc<ToolExecutor>,

    // ── Streaming ─────────────────────────────────────────────────
    pub bus: Arc<EventBus>,

    // ── Runtime ───────────────────────────────────────────────────
    pub planner: Arc<Planner>,
    pub control: Arc<ControlMap>,
    pub turns: Arc<TurnMap>,
}

impl AppState {
    /// Wire up the full service graph from config. The transport is
    /// optional: without credentials the LLM client runs on the rule-based
    /// fallback generator.
    pub fn new(config: Arc<Config>) -> cf_domain::Result<Self> {
        let transport = HttpTransport::from_config(&config.llm)?
            .map(|t| Arc::new(t) as Arc<dyn LlmTransport>);
        Self::with_transport(config, transport)
    }

    /// Like [`Self::new`] with an explicit transport (tests inject stubs
    /// here; `None` forces fallback-only operation).
    pub fn with_transport(
        config: Arc<Config>,
        transport: Option<Arc<dyn LlmTransport>>,
    ) -> cf_domain::Result<Self> {
        let sessions = Arc::new(SessionStore::new(config.sessions.conversation_cap));
        let retrieval = Arc::new(RetrievalIndex::keyword());
        let llm = Arc::new(LlmClient::new(transport, &config.llm));

        let registry = Arc::new(ToolRegistry::new());
        register_builtin_tools(&registry, config.projects.root.clone());
        llm.set_tool_catalog(registry.format_catalog());

        let executor = Arc::new(ToolExecutor::new(
            registry.clone(),
            sessions.clone(),
            retrieval.clone(),
            Duration::from_secs(config.tools.timeout_secs),
        ));

        let planner = Arc::new(Planner::new(
            llm.clone(),
            registry.clone(),
            retrieval.clone(),
            sessions.clone(),
            config.sessions.planner_history,
            config.retrieval.clone(),
        ));

        let bus = Arc::new(EventBus::new(config.events.buffer_size));

        Ok(Self {
            config,
            llm,
            retrieval,
            sessions,
            registry,
            executor,
            bus,
            planner,
            control: Arc::new(ControlMap::new()),
            turns: Arc::new(TurnMap::new()),
        })
    }
}
