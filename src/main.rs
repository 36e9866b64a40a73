use anyhow::{bail, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use topicmux::{
    load_config, ClientConfig, EnvIdentity, Identity, StaticDiscovery, StaticIdentity,
    TopicClient, WsConnector,
};
use tracing::info;

/// Subscribe to topics over one shared WebSocket and print every message
#[derive(Parser, Debug)]
#[command(name = "topicmux", version)]
struct Args {
    /// Base URL of the realtime service (http, https, ws or wss)
    #[arg(long, env = "TOPICMUX_URL")]
    url: String,

    /// Topic to subscribe to (repeatable)
    #[arg(long = "topic", short = 't', required = true)]
    topics: Vec<String>,

    /// Bearer token sent in the authenticate frame
    #[arg(long, conflicts_with = "token_env")]
    token: Option<String>,

    /// Read the bearer token from this environment variable on every connect
    #[arg(long)]
    token_env: Option<String>,

    /// TOML config file; TOPICMUX_* env vars override it
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "topicmux=info".into()),
        )
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => load_config(path)?,
        None => ClientConfig::default(),
    };
    config.apply_env();

    if args.topics.iter().any(|t| t.is_empty()) {
        bail!("topic names must not be empty");
    }

    let identity: Arc<dyn Identity> = match (&args.token, &args.token_env) {
        (_, Some(var)) => Arc::new(EnvIdentity::new(var.clone())),
        (token, None) => Arc::new(StaticIdentity::new(token.clone())),
    };

    info!(url = %args.url, topics = ?args.topics, "topicmux starting");

    let client = TopicClient::new(
        config,
        Arc::new(StaticDiscovery::new(args.url.clone())),
        identity,
        Arc::new(WsConnector::new()),
    );

    for topic in &args.topics {
        let topic_name = topic.clone();
        client.subscribe(topic.clone(), move |message| {
            let line = serde_json::json!({ "topic": topic_name, "message": message });
            println!("{}", line);
        });
    }

    tokio::signal::ctrl_c().await?;

    let stats = client.stats();
    info!(
        transports_opened = stats.transports_opened,
        reconnect_attempts = stats.reconnect_attempts,
        frames_sent = stats.frames_sent,
        "Shutting down"
    );
    client.close();

    Ok(())
}
