use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use vdisc_catalog::{CatalogConfig, CatalogPipeline};
use vdisc_core::FieldId;
use vdisc_search::{to_query_string, BudgetMode, SearchFieldModel};
use vdisc_storage::{listing_key, DirectoryStore, ListingStore};

#[derive(Debug, Parser)]
#[command(name = "vdisc-cli")]
#[command(about = "Venue discovery command-line interface")]
struct Cli {
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Recompute and print the ranked sections as JSON.
    Sections,
    /// Serve the storefront.
    Serve,
    /// Build a search query the way the search bar does.
    Search {
        #[arg(long = "where")]
        location: String,
        #[arg(long)]
        occasion: String,
        /// First (or only) day clicked.
        #[arg(long)]
        date: NaiveDate,
        /// Second day clicked; only meaningful for Funeral ranges.
        #[arg(long)]
        end_date: Option<NaiveDate>,
        #[arg(long)]
        guest: Option<String>,
        #[arg(long)]
        budget: Option<String>,
        #[arg(long)]
        whole_event: bool,
        /// Override today's date.
        #[arg(long)]
        today: Option<NaiveDate>,
    },
    /// Write an owner's listing collection into the store.
    Import { owner: String, file: PathBuf },
}

fn init_logger(verbose: bool) {
    let default = if verbose { "vdisc=debug,info" } else { "vdisc=info,warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false).compact())
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logger(cli.verbose);
    let config = CatalogConfig::from_env();

    match cli.command.unwrap_or(Commands::Sections) {
        Commands::Sections => {
            let store = Arc::new(DirectoryStore::new(config.store_dir.clone()));
            let pipeline = CatalogPipeline::new(store, config.load_blueprints()?)
                .with_listing_prefix(config.listing_prefix.clone());
            let snapshot = pipeline.recompute()?;
            println!("{}", serde_json::to_string_pretty(&snapshot)?);
        }
        Commands::Serve => vdisc_web::serve(config).await?,
        Commands::Search {
            location,
            occasion,
            date,
            end_date,
            guest,
            budget,
            whole_event,
            today,
        } => {
            let mut model = match today {
                Some(today) => SearchFieldModel::new(today),
                None => SearchFieldModel::for_local_today(),
            };
            model.set_value(FieldId::Where, location);
            model.set_occasion(occasion);
            model.open_field(FieldId::When);
            model.click_day(date)?;
            if let Some(end) = end_date {
                model.click_day(end)?;
            }
            if let Some(guest) = guest {
                model.select_guest(&guest)?;
            }
            if whole_event {
                model.set_budget_mode(BudgetMode::WholeEvent);
            }
            if let Some(budget) = budget {
                model.select_budget(&budget)?;
            }
            let criteria = model.submit()?;
            println!("{}", to_query_string(&criteria)?);
        }
        Commands::Import { owner, file } => {
            let text = std::fs::read_to_string(&file)
                .with_context(|| format!("reading {}", file.display()))?;
            let parsed: serde_json::Value = serde_json::from_str(&text)
                .with_context(|| format!("parsing {}", file.display()))?;
            if !parsed.is_array() {
                bail!("{} must contain a JSON array of listings", file.display());
            }
            let key = listing_key(&config.listing_prefix, &owner);
            DirectoryStore::new(config.store_dir.clone()).put(&key, &text)?;
            info!(%key, store = %config.store_dir.display(), "imported listings");
        }
    }

    Ok(())
}
