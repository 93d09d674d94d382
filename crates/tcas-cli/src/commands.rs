use std::io::Read;
use std::sync::Arc;

use anyhow::Context;
use colored::Colorize;
use tcas_cas::{OfferConfig, TapeOffer};
use tcas_server::TcasServer;

use crate::cli::*;

pub fn run_command(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Command::Serve(args) => cmd_serve(args),
        Command::Recover(args) => cmd_recover(args, cli.format),
        Command::LibraryStatus(args) => cmd_library_status(args),
        Command::Queue(args) => cmd_queue(args, cli.format),
    }
}

fn load_config(args: &OfferArgs) -> anyhow::Result<OfferConfig> {
    match &args.config {
        Some(path) => OfferConfig::load(path).with_context(|| format!("loading {}", path.display())),
        None => Ok(OfferConfig::with_root(&args.root)),
    }
}

fn runtime() -> anyhow::Result<tokio::runtime::Runtime> {
    tokio::runtime::Runtime::new().context("starting tokio runtime")
}

fn cmd_serve(args: ServeArgs) -> anyhow::Result<()> {
    let mut config = load_config(&args.offer)?;
    if let Some(bind) = args.bind {
        config.server.bind_addr = bind;
    }
    runtime()?.block_on(async move {
        let offer = Arc::new(TapeOffer::open(config).await?);
        let server = TcasServer::new(offer.clone());
        println!("{} tcas server on {}", "✓".green().bold(), server.settings().bind_addr.to_string().bold());
        server
            .serve(async {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    tracing::error!(error = %e, "cannot listen for shutdown signal");
                }
            })
            .await?;

        match Arc::try_unwrap(offer) {
            Ok(offer) => offer.shutdown().await,
            Err(_) => tracing::warn!("offer still shared at exit; pending archives flushed on next start"),
        }
        Ok::<_, anyhow::Error>(())
    })
}

fn cmd_recover(args: OfferArgs, format: OutputFormat) -> anyhow::Result<()> {
    let config = load_config(&args)?;
    runtime()?.block_on(async move {
        let offer = TapeOffer::open(config).await?;
        let reports = offer.bootstrap_reports().to_vec();
        offer.shutdown().await;

        match format {
            OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&reports)?),
            OutputFormat::Text => {
                for r in &reports {
                    println!("{}", r.file_bucket_id.bold());
                    println!(
                        "  archives: {} discarded, {} requeued, {} missing, {} completed, {} swept",
                        r.archives.discarded,
                        r.archives.requeued,
                        r.archives.missing,
                        r.archives.completed,
                        r.archives.swept
                    );
                    println!(
                        "  inputs:   {} orphans, {} stale, {} already packed, {} resubmitted",
                        r.inputs.orphans,
                        r.inputs.stale,
                        r.inputs.already_processed,
                        r.inputs.resubmitted.to_string().green()
                    );
                }
                println!("{} Recovery complete.", "✓".green().bold());
            }
        }
        Ok::<_, anyhow::Error>(())
    })
}

fn cmd_library_status(args: LibraryStatusArgs) -> anyhow::Result<()> {
    let output = match &args.file {
        Some(path) => std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?,
        None => {
            let mut text = String::new();
            std::io::stdin().read_to_string(&mut text).context("reading standard input")?;
            text
        }
    };
    let state = tcas_library::parse(&output);
    if !state.skipped.is_empty() {
        eprintln!("{} {} segment(s) skipped", "!".yellow().bold(), state.skipped.len());
    }
    println!("{}", serde_json::to_string_pretty(&state)?);
    Ok(())
}

fn cmd_queue(args: OfferArgs, format: OutputFormat) -> anyhow::Result<()> {
    let config = load_config(&args)?;
    let orders = TapeOffer::pending_write_orders(&config).context("reading the write order queue")?;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&orders)?),
        OutputFormat::Text if orders.is_empty() => println!("No pending write orders."),
        OutputFormat::Text => {
            for m in &orders {
                println!(
                    "{:>6}  {}  {}  {} bytes  {}",
                    m.seq,
                    m.id.yellow(),
                    m.message_type().to_string().cyan(),
                    m.order.size,
                    m.order.file_path.dimmed()
                );
            }
        }
    }
    Ok(())
}
