//! Command line entry point: on-demand server, bulk harvest, single scrape.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use goofish_scraper_rs::{HarvestConfig, HarvestConfigBuilder, Harvester, server};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "goofish-scraper")]
#[command(about = "Session-rotating harvester for the Goofish item-detail API")]
#[command(version)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Show the browser window while acquiring sessions
    #[arg(long, global = true)]
    headed: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Serve GET /scrapePDP?url=...
    Serve {
        #[arg(long, env = "BIND", default_value = "0.0.0.0:8080")]
        bind: SocketAddr,
    },
    /// Harvest every URL of the input CSV into the output CSV
    Harvest(HarvestArgs),
    /// Scrape one URL and print the JSON result
    Scrape { url: String },
}

#[derive(Args)]
struct HarvestArgs {
    /// Input CSV with a URL column
    #[arg(long)]
    input: Option<PathBuf>,
    /// Output CSV, also used as dedup cache
    #[arg(long)]
    output: Option<PathBuf>,
    /// Stop once this many items have been harvested
    #[arg(long)]
    target: Option<usize>,
    #[arg(long)]
    workers: Option<usize>,
    /// Concurrent requests per worker
    #[arg(long)]
    concurrency: Option<usize>,
}

impl HarvestArgs {
    fn apply(&self, mut builder: HarvestConfigBuilder) -> HarvestConfigBuilder {
        if let Some(path) = &self.input {
            builder = builder.with_input_csv(path);
        }
        if let Some(path) = &self.output {
            builder = builder.with_output_csv(path);
        }
        if let Some(target) = self.target {
            builder = builder.with_target(target);
        }
        if let Some(workers) = self.workers {
            builder = builder.with_workers(workers);
        }
        if let Some(concurrency) = self.concurrency {
            builder = builder.with_concurrency(concurrency);
        }
        builder
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let env_config = HarvestConfig::from_env().context("invalid environment configuration")?;

    let default_filter = if cli.verbose {
        "goofish_scraper_rs=debug,goofish_scraper=debug"
    } else {
        "goofish_scraper_rs=info,goofish_scraper=info"
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut builder = HarvestConfigBuilder::from_config(env_config);
    if cli.headed {
        builder = builder.with_headless(false);
    }
    if let Command::Harvest(args) = &cli.command {
        builder = args.apply(builder);
    }
    let config = builder.build()?;

    if !config.proxy.is_configured() {
        log::warn!("PROXY_HOST is not set, sessions and requests go out directly");
    }

    let harvester = Harvester::builder().with_config(config).build()?;

    match cli.command {
        Command::Serve { bind } => {
            server::serve(Arc::new(harvester), bind)
                .await
                .context("server failed")?;
        }
        Command::Harvest(_) => {
            let summary = harvester.harvest().await?;
            println!(
                "OK: {} | errors: {} | rows: {} | {:.0}s | {:.2}/s",
                summary.successes,
                summary.failures,
                summary.persisted_rows,
                summary.elapsed.as_secs_f64(),
                summary.rate()
            );
        }
        Command::Scrape { url } => {
            let report = harvester.scrape(&url).await;
            println!("{}", serde_json::to_string_pretty(&vec![report.to_json()])?);
        }
    }
    Ok(())
}
