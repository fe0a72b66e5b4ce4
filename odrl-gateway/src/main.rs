use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // JSON logs in production (GATEWAY_LOG_JSON=1), human-readable otherwise
    let json_logs = std::env::var("GATEWAY_LOG_JSON").unwrap_or_default() == "1";
    let filter = EnvFilter::from_default_env()
        .add_directive("odrl_gateway=info".parse()?)
        .add_directive("tower_http=info".parse()?);
    if json_logs {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    let config = odrl_gateway::config::GatewayConfig::parse();
    tracing::info!("Starting policy gateway on {}", config.listen_addr);
    tracing::info!("Decision engine at {}", config.decision_engine_url);

    let server = odrl_gateway::server::Server::new(config);
    server.run().await
}
