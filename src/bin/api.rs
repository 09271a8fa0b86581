use finance_agent_router::{
    agent::Diagnostics,
    api::{start_server, ApiState},
    config::{init_tracing, Settings},
    gemini::GeminiClient,
    router::IntentRouter,
    state::build_session_store,
    tools::create_default_registry,
};
use std::sync::Arc;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing("info");

    let settings = Settings::from_env()?;

    info!("Finance Agent Router - API Server");
    info!("Port: {}", settings.api_port);
    info!("Model: {}", settings.gemini.model);
    if settings.tools_api_base_url.is_none() {
        warn!("TOOLS_API_BASE_URL not set; remote tools will report transport failures");
    }

    let model = Arc::new(GeminiClient::new(&settings.gemini)?);
    let registry = Arc::new(create_default_registry(
        settings.tools_api_base_url.as_deref(),
        settings.agent.transport_retries,
    ));
    let store = build_session_store(&settings);
    let diagnostics = Arc::new(Diagnostics::new());

    let router = IntentRouter::with_default_agents(
        model,
        registry,
        store,
        settings.router,
        settings.agent,
        settings.policy_dir.as_deref(),
        diagnostics,
    )
    .await?;

    info!("Router initialized");

    start_server(ApiState::new(Arc::new(router)), settings.api_port).await?;

    Ok(())
}
