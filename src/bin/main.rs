use finance_agent_router::{
    agent::Diagnostics,
    config::{init_tracing, Settings},
    gemini::GeminiClient,
    router::IntentRouter,
    state::build_session_store,
    tools::create_default_registry,
};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::info;
use uuid::Uuid;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing("warn");

    let settings = Settings::from_env()?;

    let model = Arc::new(GeminiClient::new(&settings.gemini)?);
    let registry = Arc::new(create_default_registry(
        settings.tools_api_base_url.as_deref(),
        settings.agent.transport_retries,
    ));
    let diagnostics = Arc::new(Diagnostics::new());

    let router = IntentRouter::with_default_agents(
        model,
        registry,
        build_session_store(&settings),
        settings.router,
        settings.agent,
        settings.policy_dir.as_deref(),
        diagnostics.clone(),
    )
    .await?;

    let session_id = Uuid::new_v4().to_string();
    info!(session_id = %session_id, "Interactive session started");

    println!("Finance assistant. Session {}", session_id);
    println!("Type a question, or 'exit' to quit.\n");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    loop {
        stdout.write_all(b"> ").await?;
        stdout.flush().await?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let input = line.trim();
        if input.is_empty() {
            continue;
        }
        if input.eq_ignore_ascii_case("exit") || input.eq_ignore_ascii_case("quit") {
            break;
        }

        let response = router.handle_turn(&session_id, input).await;

        println!("\n[{}] {}", response.agent, response.message);
        for chart in &response.charts {
            println!("  chart: {} ({})", chart.title, chart.filename);
        }
        if let Some(portfolio) = &response.portfolio {
            println!("  portfolio total: {:.2}", portfolio.total());
        }
        println!();
    }

    let snapshot = diagnostics.snapshot();
    info!(
        tool_calls = snapshot.tool_calls,
        validation_retries = snapshot.validation_retries,
        routing_fallbacks = snapshot.routing_fallbacks,
        "Session finished"
    );

    Ok(())
}
