use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;

use clap::Parser;
use log::info;

use ftransport::Config;
use server::Server;

/// File-transfer server over UDP with selectable ARQ recovery.
#[derive(Parser, Debug)]
#[command(name = "start-server")]
struct Args {
    /// Increase output verbosity
    #[arg(short, long)]
    verbose: bool,

    /// Decrease output verbosity
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Service ip address
    #[arg(short = 'H', long, default_value = "0.0.0.0")]
    host: IpAddr,

    /// Service port
    #[arg(short, long, default_value_t = 6379)]
    port: u16,

    /// Storage dir path
    #[arg(short, long, default_value = "./storage")]
    storage: PathBuf,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let default_filter = if args.verbose {
        "debug"
    } else if args.quiet {
        "warn"
    } else {
        "info"
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .init();

    let addr = SocketAddr::new(args.host, args.port);
    let server = match Server::bind(addr, &args.storage, Config::new()).await {
        Ok(server) => server,
        Err(e) => {
            log::error!("failed to start server: {e}");
            std::process::exit(1);
        }
    };

    tokio::select! {
        result = server.run() => {
            if let Err(e) = result {
                log::error!("dispatcher failed: {e}");
                std::process::exit(1);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("interrupt received, shutting down");
        }
    }
}
