use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "tcas",
    about = "Tape offer: staging, tar packing and tape write orders",
    version,
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Command {
    /// Recover every file bucket and serve the admin API
    Serve(ServeArgs),
    /// Run bootstrap recovery, flush what it resubmitted, and exit (fails if a server owns the tree)
    Recover(OfferArgs),
    /// Parse tape changer status output and print it as JSON
    LibraryStatus(LibraryStatusArgs),
    /// List pending write orders (read-only, safe next to a running server)
    Queue(OfferArgs),
}

/// Where the offer's configuration comes from.
#[derive(Args, Debug)]
pub struct OfferArgs {
    /// TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,
    /// Keep staging and journals under this directory (ignored with --config)
    #[arg(long, default_value = ".")]
    pub root: PathBuf,
}

#[derive(Args, Debug)]
pub struct ServeArgs {
    #[command(flatten)]
    pub offer: OfferArgs,
    /// Override the configured listen address
    #[arg(long)]
    pub bind: Option<SocketAddr>,
}

#[derive(Args, Debug)]
pub struct LibraryStatusArgs {
    /// File holding the changer output; standard input if absent
    pub file: Option<PathBuf>,
}
