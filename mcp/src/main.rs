use std::net::SocketAddr;

use clap::{Parser, ValueEnum};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use stackintel_mcp_runtime::{DEFAULT_API_HOST, GatewayConfig, McpServer, catalog};

mod http;

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum TransportMode {
    /// One long-lived session over stdin/stdout for a single trusted caller.
    Stdio,
    /// Concurrent per-request transport with bearer credentials and an
    /// origin allowlist.
    Http,
}

#[derive(Parser)]
#[command(
    name = "stackintel-mcp",
    version,
    about = "StackIntel MCP gateway — technology-intelligence tools over stdio or HTTP"
)]
struct Cli {
    /// Upstream API hostname
    #[arg(long, env = "STACKINTEL_API_HOST", default_value = DEFAULT_API_HOST)]
    api_host: String,

    /// Process-wide fallback API key
    #[arg(long, env = "STACKINTEL_API_KEY")]
    api_key: Option<String>,

    /// Transport mode
    #[arg(long, env = "MCP_TRANSPORT", value_enum, default_value = "stdio")]
    transport: TransportMode,

    /// Comma-separated origin allowlist for the HTTP transport (empty = allow any)
    #[arg(long, env = "MCP_ALLOWED_ORIGINS")]
    allowed_origins: Option<String>,

    /// Listening port for the HTTP transport (bound to loopback only)
    #[arg(long, env = "MCP_PORT", default_value_t = 8787)]
    port: u16,
}

#[tokio::main]
async fn main() {
    // Load .env if present (dev only)
    let _ = dotenvy::dotenv();

    // Structured JSON logging on stderr — stdout belongs to the stdio
    // transport's protocol channel.
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "stackintel_mcp=info,tower_http=info".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(std::io::stderr),
        )
        .init();

    let cli = Cli::parse();

    // Force catalog construction here so a duplicate tool or prompt name
    // aborts at startup instead of mid-session.
    let _ = catalog::tools();
    let _ = catalog::prompts();

    let config = GatewayConfig::new(cli.api_host, cli.api_key);

    match cli.transport {
        TransportMode::Stdio => {
            let server = McpServer::new(config);
            if let Err(err) = server.serve_stdio().await {
                tracing::error!("stdio session ended with error: {err}");
                std::process::exit(1);
            }
        }
        TransportMode::Http => {
            let allowed_origins = http::parse_origin_allowlist(cli.allowed_origins.as_deref());
            let addr = SocketAddr::from(([127, 0, 0, 1], cli.port));
            if let Err(err) = http::serve(addr, config, allowed_origins).await {
                tracing::error!("HTTP transport failed: {err}");
                std::process::exit(1);
            }
        }
    }
}
