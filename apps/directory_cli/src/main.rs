use std::{path::PathBuf, sync::Arc};

use anyhow::{anyhow, Result};
use clap::{Args, Parser, Subcommand};
use client_core::{
    Debouncer, DirectoryClient, HttpCompanyBackend, MutationOutcome, Resolution, SortOrder,
    ViewFilter,
};
use shared::domain::{Company, CompanyId};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod config;

use config::{load_settings, normalize_server_url};

#[derive(Parser, Debug)]
#[command(about = "Browse, rank and tag the company directory")]
struct Cli {
    /// Overrides the server url from config and environment.
    #[arg(long)]
    server_url: Option<String>,
    #[arg(long)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug, Default)]
struct FilterArgs {
    #[arg(long, default_value = "")]
    query: String,
    #[arg(long, default_value = "")]
    tag: String,
    #[arg(long, default_value = "")]
    tier: String,
    /// tier | name | founded-newest | founded-oldest
    #[arg(long, default_value = "tier")]
    sort: String,
}

#[derive(Subcommand, Debug)]
enum Command {
    List(FilterArgs),
    Tags,
    Upvote { id: i64 },
    Downvote { id: i64 },
    Rank { id: i64, value: String },
    Tier { id: i64, tier: String },
    TagAdd { id: i64, tag: String },
    TagRemove { id: i64, index: usize },
    /// Reads search terms from stdin and re-renders after typing settles.
    Search(FilterArgs),
}

impl FilterArgs {
    fn to_filter(&self) -> Result<ViewFilter> {
        let sort = SortOrder::parse(&self.sort)
            .ok_or_else(|| anyhow!("unknown sort order '{}'", self.sort))?;
        Ok(ViewFilter {
            query: self.query.clone(),
            tag: self.tag.clone(),
            tier: self.tier.clone(),
            sort,
        })
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
    let cli = Cli::parse();

    let mut settings = load_settings(cli.config.as_deref())?;
    if let Some(url) = &cli.server_url {
        settings.server_url = normalize_server_url(url)?;
    }
    info!(server_url = %settings.server_url, "directory: starting");

    let backend = HttpCompanyBackend::new(settings.server_url.clone(), settings.request_timeout())?;
    let client = DirectoryClient::with_error_flash(Arc::new(backend), settings.error_flash());
    if let Err(err) = client.load().await {
        warn!(error = %err, "directory: continuing with an empty list");
    }

    match cli.command {
        Command::List(args) => print_view(&client, &args.to_filter()?).await,
        Command::Tags => {
            for tag in client.tag_vocabulary().await {
                println!("{tag}");
            }
        }
        Command::Upvote { id } => report(client.upvote(CompanyId(id)).await),
        Command::Downvote { id } => report(client.downvote(CompanyId(id)).await),
        Command::Rank { id, value } => report(client.set_rank_input(CompanyId(id), &value).await),
        Command::Tier { id, tier } => report(client.set_tier_input(CompanyId(id), &tier).await),
        Command::TagAdd { id, tag } => report(client.add_tag(CompanyId(id), &tag).await),
        Command::TagRemove { id, index } => report(client.remove_tag(CompanyId(id), index).await),
        Command::Search(args) => run_search(&client, args.to_filter()?, settings.search_debounce()).await?,
    }

    Ok(())
}

async fn run_search(
    client: &DirectoryClient,
    base: ViewFilter,
    debounce: std::time::Duration,
) -> Result<()> {
    let (mut debouncer, mut queries) = Debouncer::new(debounce);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    print_view(client, &base).await;

    loop {
        tokio::select! {
            line = lines.next_line() => match line? {
                Some(query) => debouncer.schedule(query),
                None => {
                    debouncer.cancel();
                    break;
                }
            },
            Some(query) = queries.recv() => {
                let filter = ViewFilter {
                    query,
                    ..base.clone()
                };
                print_view(client, &filter).await;
            }
        }
    }
    Ok(())
}

async fn print_view(client: &DirectoryClient, filter: &ViewFilter) {
    for company in client.view(filter).await {
        println!("{}", render_row(&company));
    }
    println!("{}", client.summary(filter).await.label());
}

fn render_row(company: &Company) -> String {
    let founders = company
        .founders
        .iter()
        .map(|f| f.name.as_str())
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "{:>5} {:>4} {:<2} {:<28} [{}] {} | {}",
        company.id,
        company.rank,
        company.tier,
        company.name,
        company.tags.join(", "),
        founders,
        company.short_description()
    )
}

fn report(result: Result<MutationOutcome, shared::error::DirectoryError>) {
    match result {
        Ok(outcome) => match outcome.resolution {
            Resolution::Confirmed { company, .. } => println!("saved: {}", render_row(&company)),
            Resolution::Superseded => println!("superseded by a newer change"),
            Resolution::RolledBack { company, error } => {
                println!("reverted ({error}): {}", render_row(&company))
            }
        },
        Err(err) => {
            warn!(code = ?err.code(), error = %err, "directory: change not applied");
            println!("not applied: {err}");
        }
    }
}
