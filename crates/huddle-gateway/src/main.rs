use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tokio::net::TcpListener;

use huddle_gateway::{parse_ice_servers, AppState, GatewayConfig};

#[derive(Parser, Debug)]
#[command(name = "huddle-gateway", version, about = "Huddle room and signaling gateway")]
struct Args {
    /// Address to bind.
    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    host: IpAddr,

    #[arg(long, env = "PORT", default_value_t = 8080)]
    port: u16,

    /// Directory holding the browser client.
    #[arg(long, env = "HUDDLE_STATIC_DIR", default_value = "public")]
    static_dir: PathBuf,

    /// ICE server URL handed to clients. Repeat or comma-separate for several.
    #[arg(long = "ice-server", env = "HUDDLE_ICE_SERVERS", value_delimiter = ',')]
    ice_servers: Vec<String>,

    /// Public signaling URL, when the gateway sits behind a proxy.
    #[arg(long, env = "WS_SIGNALING_URL")]
    ws_signaling_url: Option<String>,

    /// Default log filter; `RUST_LOG` wins when set.
    #[arg(long, env = "HUDDLE_LOG", default_value = "info")]
    log_level: String,
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!("failed to listen for ctrl-c: {}", err);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                tracing::error!("failed to listen for SIGTERM: {}", err);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("shutdown requested");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let args = Args::parse();
    huddle_common::init_tracing_with_default(&args.log_level);

    let config = GatewayConfig {
        static_dir: args.static_dir,
        ice_servers: parse_ice_servers(&args.ice_servers),
        ws_signaling_url: args.ws_signaling_url,
    };
    if !config.static_dir.is_dir() {
        tracing::warn!(
            "static directory {} does not exist; only signaling will be served",
            config.static_dir.display()
        );
    }

    let addr = SocketAddr::new(args.host, args.port);
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    let bound_addr = listener.local_addr()?;
    tracing::info!("gateway listening on {}", bound_addr);
    tracing::info!(
        "ice servers: {}",
        config
            .ice_servers
            .iter()
            .flat_map(|server| server.urls.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(", ")
    );

    huddle_gateway::serve(listener, AppState::new(config), shutdown_signal()).await?;
    tracing::info!("gateway stopped");

    Ok(())
}
