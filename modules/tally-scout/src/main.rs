use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use tally_common::config::load_config;
use tally_common::{AppConfig, MonthKey, TweetId};
use tally_scout::pipeline::{Pipeline, RunOptions};
use tally_scout::report::monthly_report;
use x_client::XClient;

#[derive(Parser)]
#[command(name = "tally", about = "Tally engagement with a target account")]
struct Cli {
    /// Path to config TOML file
    #[arg(long, global = true, default_value = "./config/tally.toml")]
    config: PathBuf,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Fetch new mentions and quotes, filter, score and merge (the default)
    Run(RunArgs),
    /// Write the scored report for one calendar month
    Report {
        /// Month as YYYY-MM
        #[arg(long, value_parser = parse_month)]
        month: MonthKey,
        /// Re-fetch metrics before scoring
        #[arg(long)]
        refresh: bool,
    },
    /// Re-look-up every post in the memo
    RefreshMemo,
}

#[derive(Args, Default)]
struct RunArgs {
    /// Start after this id for a category, as <category>=<id>. Repeatable.
    #[arg(long = "since-id", value_parser = parse_since_id)]
    since_id: Vec<(String, TweetId)>,

    /// Only fetch posts created at or after this RFC 3339 time
    #[arg(long, value_parser = parse_time)]
    start_time: Option<DateTime<Utc>>,

    /// Only fetch posts created before this RFC 3339 time
    #[arg(long, value_parser = parse_time)]
    end_time: Option<DateTime<Utc>>,
}

impl RunArgs {
    fn into_options(self) -> RunOptions {
        RunOptions {
            since_ids: self.since_id.into_iter().collect(),
            start_time: self.start_time,
            end_time: self.end_time,
        }
    }
}

fn parse_month(raw: &str) -> Result<MonthKey, String> {
    MonthKey::parse(raw).ok_or_else(|| format!("expected YYYY-MM, got {raw:?}"))
}

fn parse_since_id(raw: &str) -> Result<(String, TweetId), String> {
    let (category, id) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected <category>=<id>, got {raw:?}"))?;
    let id = TweetId::parse(id).map_err(|e| e.to_string())?;
    Ok((category.trim().to_string(), id))
}

fn parse_time(raw: &str) -> Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| format!("{raw:?}: {e}"))
}

fn init_tracing(json: bool) -> Result<()> {
    let filter = EnvFilter::from_default_env()
        .add_directive("tally=info".parse()?)
        .add_directive("x_client=info".parse()?);
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json)?;

    info!(config = %cli.config.display(), "Loading config");
    let config = load_config(&cli.config).with_context(|| {
        format!(
            "Config file not found or invalid: {}. Create one or specify --config <path>",
            cli.config.display()
        )
    })?;
    let env = AppConfig::from_env()?;
    let client = match env.api_base_url {
        Some(url) => XClient::with_base_url(env.bearer_token, url),
        None => XClient::new(env.bearer_token),
    };

    match cli.command.unwrap_or(Command::Run(RunArgs::default())) {
        Command::Run(args) => {
            let stats = Pipeline::new(&config, &client)
                .run(&args.into_options())
                .await?;
            println!("{stats}");
        }
        Command::Report { month, refresh } => {
            let summary = monthly_report(&config, &client, month, refresh).await?;
            println!("{summary}");
        }
        Command::RefreshMemo => {
            let refresh = Pipeline::new(&config, &client).refresh_memo().await?;
            println!("{refresh}");
        }
    }

    Ok(())
}
