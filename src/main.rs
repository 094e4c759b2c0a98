use anyhow::Result;
use scriptwatch::auth::SharedSecretAuthenticator;
use scriptwatch::orchestrator::Orchestrator;
use scriptwatch::persistence::RetryPolicy;
use scriptwatch::ws::{Broadcaster, ConnectionRegistry};
use scriptwatch::Config;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();

    if args.iter().any(|a| a == "--help" || a == "-h") {
        print_help();
        return Ok(());
    }

    if args.iter().any(|a| a == "--version" || a == "-V") {
        println!("scriptwatch {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("scriptwatch=info,tower_http=warn")),
        )
        .init();

    let config = Config::from_env();
    tracing::info!(
        watch_root = %config.watch_root.display(),
        database_path = %config.database_path.display(),
        port = config.bind_port,
        "starting scriptwatch"
    );

    let registry = ConnectionRegistry::new();
    let broadcaster = Broadcaster::new(registry.clone());

    let (orchestrator, pipeline_handle) = Orchestrator::start(
        config.watch_root.clone(),
        &config.database_path,
        RetryPolicy {
            max_attempts: config.retry_max_attempts,
            base_delay_ms: config.retry_base_delay_ms,
        },
        config.sla_threshold_ms,
        config.ring_buffer_size,
        config.grace_period_ms,
        broadcaster,
    )
    .await?;

    let auth_secret = std::env::var("SCRIPTWATCH_AUTH_SECRET").unwrap_or_else(|_| "dev-secret".to_string());
    let auth: Arc<dyn scriptwatch::auth::AuthPredicate> =
        Arc::new(SharedSecretAuthenticator::new(auth_secret));

    let server = scriptwatch::net::run(config.bind_port, orchestrator.clone(), registry, auth);

    tokio::select! {
        result = server => {
            result?;
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutdown signal received");
        }
    }

    if let Err(err) = orchestrator.stop(pipeline_handle).await {
        tracing::warn!(%err, "pipeline shutdown exceeded grace period");
    }
    Ok(())
}

fn print_help() {
    println!(
        "scriptwatch {}\n\n\
         USAGE:\n    scriptwatch\n\n\
         Watches a directory of transcript (.jsonl) files, parses and persists\n\
         conversations, and fans out updates to subscribed WebSocket clients\n\
         on /ws.\n\n\
         OPTIONS:\n    -h, --help       print this help\n    -V, --version    print the version\n\n\
         ENVIRONMENT:\n    \
         SCRIPTWATCH_WATCH_ROOT          directory to watch (default: ~/.claude/projects)\n    \
         SCRIPTWATCH_SLA_THRESHOLD_MS    detection-latency SLA threshold (default: 100)\n    \
         SCRIPTWATCH_RING_BUFFER_SIZE    performance-monitor sample capacity (default: 1000)\n    \
         SCRIPTWATCH_RETRY_MAX_ATTEMPTS  persistence write retry attempts (default: 3)\n    \
         SCRIPTWATCH_RETRY_BASE_DELAY_MS persistence retry base delay, ms (default: 100)\n    \
         SCRIPTWATCH_GRACE_PERIOD_MS     shutdown grace period, ms (default: 5000)\n    \
         SCRIPTWATCH_DATABASE_PATH       SQLite database path\n    \
         SCRIPTWATCH_BIND_PORT           WebSocket server port (default: 7700)\n    \
         SCRIPTWATCH_AUTH_SECRET         shared secret the WebSocket handshake checks\n",
        env!("CARGO_PKG_VERSION")
    );
}
