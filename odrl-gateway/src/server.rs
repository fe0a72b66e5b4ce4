use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use crate::config::GatewayConfig;
use crate::policy::{
    AuditLog, DecisionEngine, ExternalState, GraphSynchronizer, HttpDecisionEngine, HttpFetcher,
    InterpolationResolver, PolicyEngine, PolicyStore, ResourceFetcher, TokenRegistry,
};

/// State shared by every request handler.
pub struct SharedState {
    pub config: GatewayConfig,
    pub engine: PolicyEngine,
}

pub struct Server {
    config: GatewayConfig,
    decider: Arc<dyn DecisionEngine>,
    fetcher: Arc<dyn ResourceFetcher>,
}

impl Server {
    /// Server talking to the configured HTTP decision engine.
    pub fn new(config: GatewayConfig) -> Self {
        let decider = Arc::new(HttpDecisionEngine::new(config.decision_engine_url.clone()));
        Self::with_collaborators(config, decider, Arc::new(HttpFetcher::new()))
    }

    /// Server with a caller-supplied decision engine and resource fetcher.
    pub fn with_collaborators(
        config: GatewayConfig,
        decider: Arc<dyn DecisionEngine>,
        fetcher: Arc<dyn ResourceFetcher>,
    ) -> Self {
        Server {
            config,
            decider,
            fetcher,
        }
    }

    fn build_state(&self) -> Result<Arc<SharedState>> {
        let config = &self.config;
        let sync = GraphSynchronizer::new(
            &config.data_file,
            &config.graph_file,
            config.policy_base_uri.clone(),
        );
        let store = PolicyStore::open(sync).with_context(|| {
            format!(
                "Failed to load policies from {} / {}",
                config.data_file.display(),
                config.graph_file.display()
            )
        })?;
        let tokens = TokenRegistry::open(&config.tokens_file)
            .with_context(|| format!("Failed to load tokens from {}", config.tokens_file.display()))?;

        let engine = PolicyEngine::new(
            store,
            InterpolationResolver::new(ExternalState::new(&config.status_file)),
            Arc::clone(&self.decider),
            Arc::clone(&self.fetcher),
            AuditLog::new(&config.eval_log_file),
            tokens,
        );
        Ok(Arc::new(SharedState {
            config: config.clone(),
            engine,
        }))
    }

    /// Serve until Ctrl-C.
    pub async fn run(self) -> Result<()> {
        let state = self.build_state()?;
        let listener = TcpListener::bind(&self.config.listen_addr)
            .await
            .with_context(|| format!("Failed to bind {}", self.config.listen_addr))?;
        tracing::info!("HTTP listener on {}", listener.local_addr()?);

        axum::serve(listener, crate::web::router(state))
            .with_graceful_shutdown(async {
                let _ = tokio::signal::ctrl_c().await;
                tracing::info!("Shutting down");
            })
            .await?;
        Ok(())
    }

    /// Start the server and return the bound address (for testing).
    pub async fn start(self) -> Result<(SocketAddr, JoinHandle<Result<()>>)> {
        let state = self.build_state()?;
        let listener = TcpListener::bind(&self.config.listen_addr).await?;
        let addr = listener.local_addr()?;
        tracing::info!("Listening on {addr}");

        let router = crate::web::router(state);
        let handle = tokio::spawn(async move {
            axum::serve(listener, router).await?;
            Ok(())
        });
        Ok((addr, handle))
    }
}
