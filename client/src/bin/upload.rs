use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;

use clap::Parser;
use log::error;

use client::{init_logging, Protocol, TransferClient};
use ftransport::Config;

/// Upload a file to the transfer server.
#[derive(Parser, Debug)]
#[command(name = "upload")]
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

    /// Source file path
    #[arg(short, long)]
    src: PathBuf,

    /// File name on the server (defaults to the source file name)
    #[arg(short, long)]
    name: Option<String>,

    /// Error recovery protocol
    #[arg(short = 'r', long, value_enum, default_value = "SW")]
    protocol: Protocol,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    init_logging(args.verbose, args.quiet);

    let name = match &args.name {
        Some(name) => name.clone(),
        None => match args.src.file_name() {
            Some(name) => name.to_string_lossy().into_owned(),
            None => {
                error!("cannot derive a file name from {}", args.src.display());
                std::process::exit(1);
            }
        },
    };

    let server = SocketAddr::new(args.host, args.port);
    let driver = TransferClient::new(server, args.protocol.into(), Config::new());

    if let Err(e) = driver.upload(&args.src, &name).await {
        error!("upload failed: {e}");
        std::process::exit(1);
    }
}
