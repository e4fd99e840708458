//! packetfs CLI
//!
//! One binary for every pipeline component.
//!
//! # Usage
//!
//! ```bash
//! IFACE=eth0 DST_MAC=02:00:00:00:00:0b packetfs tx --len 1400 --duration 10
//! IFACE=eth0 PFS_OP=1 IMM=90 packetfs rx --duration 10
//! packetfs task-produce --path /dev/shm/pfs.ring --cidr 192.0.2.0/24 --port 80
//! packetfs task-consume --path /dev/shm/pfs.ring --drain --print
//! packetfs syn --cidr 198.51.100.0/30 --ports 80,443 --src-ip 192.0.2.1 --pps 1000
//! ```
//!
//! Diagnostics (`RUST_LOG`, default `info`) go to stderr; the run summary
//! goes to stdout. Exit status: 0 success, 1 runtime error, 2 usage error.

use clap::{Parser, Subcommand};
use std::process::ExitCode;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;
mod config;
mod output;

use commands::{Context, UsageError};

#[derive(Parser)]
#[command(name = "packetfs")]
#[command(version)]
#[command(about = "packetfs raw-Ethernet pipeline tools", long_about = None)]
struct Cli {
    /// Summary format
    #[arg(long, short, global = true, default_value = "text")]
    format: output::OutputFormat,

    /// Profile name from ~/.packetfs
    #[arg(long, short, global = true)]
    profile: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Transmit frames through a TPACKET TX ring
    Tx(commands::tx::TxArgs),
    /// Receive frames through a TPACKET_V3 RX ring
    Rx(commands::rx::RxArgs),
    /// Publish a CIDR × ports sweep into a task ring
    TaskProduce(commands::taskring::ProduceArgs),
    /// Drain a task ring, optionally probing each task
    TaskConsume(commands::taskring::ConsumeArgs),
    /// Send paced TCP SYN probes over a raw IPv4 socket
    Syn(commands::syn::SynArgs),
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            return if e.use_stderr() { ExitCode::from(2) } else { ExitCode::SUCCESS };
        }
    };

    init_tracing();
    pfs_common::shutdown::install_signal_handlers();

    let profile = match config::Profile::load(cli.profile.as_deref()) {
        Ok(p) => p,
        Err(e) => {
            eprintln!("error: {e:#}");
            return ExitCode::from(2);
        }
    };
    let ctx = Context::new(cli.format, profile);

    let result = match cli.command {
        Commands::Tx(args) => commands::tx::handle(args, &ctx),
        Commands::Rx(args) => commands::rx::handle(args, &ctx),
        Commands::TaskProduce(args) => commands::taskring::produce(args, &ctx),
        Commands::TaskConsume(args) => commands::taskring::consume(args, &ctx),
        Commands::Syn(args) => commands::syn::handle(args, &ctx),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e:#}");
            if e.downcast_ref::<UsageError>().is_some() {
                ExitCode::from(2)
            } else {
                ExitCode::from(1)
            }
        }
    }
}
