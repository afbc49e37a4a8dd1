use std::sync::Arc;

use local_task_agent::api_server;
use local_task_agent::config::{AgentConfig, RunModels};
use local_task_agent::llm_gateway::LLMClient;
use local_task_agent::tools::ToolRegistry;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    println!("🤖 Local Task Agent Backend starting...");

    let config = Arc::new(AgentConfig::from_env());
    println!(
        "⚙️ Limits: {} retries per step, {} steps per run.",
        config.max_retries, config.max_workflow_steps
    );

    let llm = LLMClient::new()?;
    let tools = Arc::new(ToolRegistry::probe(&config).await);
    let default_models = RunModels::from_env();
    println!("🧭 Default planner model: {}", default_models.planner);

    api_server::start_api_server(llm, tools, config, default_models).await?;
    Ok(())
}
