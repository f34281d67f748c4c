use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;

use clap::Parser;
use log::error;

use client::{init_logging, Protocol, TransferClient};
use ftransport::Config;

/// Download a file from the transfer server.
#[derive(Parser, Debug)]
#[command(name = "download")]
struct Args {
    /// Increase output verbosity
    #[arg(short, long)]
    verbose: bool,

    /// Decrease output verbosity
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Server ip address
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    host: IpAddr,

    /// Server port
    #[arg(short, long, default_value_t = 6379)]
    port: u16,

    /// Destination file path
    #[arg(short, long)]
    dst: PathBuf,

    /// File name on the server
    #[arg(short, long)]
    name: String,

    /// Error recovery protocol
    #[arg(short = 'r', long, value_enum, default_value = "SW")]
    protocol: Protocol,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    init_logging(args.verbose, args.quiet);

    let server = SocketAddr::new(args.host, args.port);
    let driver = TransferClient::new(server, args.protocol.into(), Config::new());

    if let Err(e) = driver.download(&args.dst, &args.name).await {
        error!("download failed: {e}");
        std::process::exit(1);
    }
}
