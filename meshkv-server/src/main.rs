use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use meshkv_server::{LogMetric, Node, NodeOptions};

#[derive(Parser, Debug)]
#[command(name = "meshkv-server", about = "Embedded distributed key/value store node")]
struct Args {
    /// Listener address.
    #[arg(short = 'l', long = "listen", default_value = "tcp://localhost:0")]
    listen: String,

    /// Address of a target node; may be given multiple times.
    #[arg(short = 'p', long = "peer")]
    peer: Vec<String>,

    /// Interval in which a peer is pinged in order to test its availability.
    #[arg(short = 'b', long = "peer-ping-interval", default_value = "500ms", value_parser = humantime::parse_duration)]
    peer_ping_interval: Duration,

    /// Duration after which a failing peer is reconnected.
    #[arg(short = 'r', long = "peer-reconnect-interval", default_value = "5s", value_parser = humantime::parse_duration)]
    peer_reconnect_interval: Duration,

    /// Interval in which the store is cleaned up.
    #[arg(short = 't', long = "tidy-interval", default_value = "5s", value_parser = humantime::parse_duration)]
    tidy_interval: Duration,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(err) => {
            let failed = err.use_stderr();
            let _ = err.print();
            return if failed { ExitCode::from(1) } else { ExitCode::SUCCESS };
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let options = NodeOptions {
        listen_url: args.listen,
        peer_urls: args.peer,
        peer_ping_interval: args.peer_ping_interval,
        peer_reconnect_interval: args.peer_reconnect_interval,
        tidy_interval: args.tidy_interval,
    };

    let node = match Node::start(options, Arc::new(LogMetric)).await {
        Ok(node) => node,
        Err(err) => {
            tracing::error!("startup: {err}");
            return ExitCode::from(1);
        }
    };
    tracing::info!("node is listening at {}", node.listen_url());

    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!("signal: {err}");
    }

    if let Err(err) = node.close().await {
        tracing::error!("shutdown: {err}");
        return ExitCode::from(1);
    }
    tracing::info!("node shut down");
    ExitCode::SUCCESS
}
