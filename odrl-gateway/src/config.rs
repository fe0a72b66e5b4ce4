use std::path::{Path, PathBuf};

use clap::Parser;

#[derive(Parser, Debug, Clone)]
#[command(name = "odrl-gateway", about = "ODRL policy store and evaluation gateway")]
pub struct GatewayConfig {
    /// Address to listen on.
    #[arg(long, env = "GATEWAY_LISTEN_ADDR", default_value = "127.0.0.1:8000")]
    pub listen_addr: String,

    /// Policy documents, keyed by id.
    #[arg(long, env = "GATEWAY_DATA_FILE", default_value = "policies.json")]
    pub data_file: PathBuf,

    /// Append-only evaluation log (one JSON record per line).
    #[arg(long, env = "GATEWAY_EVAL_LOG_FILE", default_value = "evaluation_log.json")]
    pub eval_log_file: PathBuf,

    /// Turtle serialization of the policy graph.
    #[arg(long, env = "GATEWAY_GRAPH_FILE", default_value = "output.ttl")]
    pub graph_file: PathBuf,

    /// Valid access tokens.
    #[arg(long, env = "GATEWAY_TOKENS_FILE", default_value = "tokens.json")]
    pub tokens_file: PathBuf,

    /// Read-only status file consulted by the `status_var` evaluator.
    #[arg(long, env = "GATEWAY_STATUS_FILE", default_value = "status.json")]
    pub status_file: PathBuf,

    /// Base URI of policy nodes in the graph (`<base>:<id>`).
    #[arg(long, env = "GATEWAY_POLICY_BASE_URI", default_value = "http://example.com/policy")]
    pub policy_base_uri: String,

    /// Endpoint of the external decision engine.
    #[arg(
        long,
        env = "GATEWAY_DECISION_ENGINE_URL",
        default_value = "http://127.0.0.1:9000/enforce"
    )]
    pub decision_engine_url: String,

    /// CORS origins. Empty allows any origin.
    #[arg(long, env = "GATEWAY_ALLOWED_ORIGINS", value_delimiter = ',')]
    pub allowed_origins: Vec<String>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        GatewayConfig {
            listen_addr: "127.0.0.1:8000".to_string(),
            data_file: "policies.json".into(),
            eval_log_file: "evaluation_log.json".into(),
            graph_file: "output.ttl".into(),
            tokens_file: "tokens.json".into(),
            status_file: "status.json".into(),
            policy_base_uri: "http://example.com/policy".to_string(),
            decision_engine_url: "http://127.0.0.1:9000/enforce".to_string(),
            allowed_origins: Vec::new(),
        }
    }
}

impl GatewayConfig {
    /// Defaults with every durable file placed under `dir`.
    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        let defaults = Self::default();
        GatewayConfig {
            data_file: dir.join(&defaults.data_file),
            eval_log_file: dir.join(&defaults.eval_log_file),
            graph_file: dir.join(&defaults.graph_file),
            tokens_file: dir.join(&defaults.tokens_file),
            status_file: dir.join(&defaults.status_file),
            ..defaults
        }
    }
}
