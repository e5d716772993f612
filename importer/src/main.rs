//! Exchanger operator binary.
//!
//! Runs rate imports and gives operators conversion, inspection and manual
//! pinning against the configured rate store.

use std::sync::Arc;

use anyhow::Context;
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use rust_decimal::Decimal;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use exchanger_common::{Currency, Money, ProviderId};
use exchanger_importer::{ImportOutcome, ImportReport, ImportScheduler, ImporterConfig};
use exchanger_rates::{
    pin_rate, preview, unpin_rate, ConversionService, HttpRateFetcher, MemoryRateStore,
    ProviderRegistry, RateTable, SharedRateStore,
};
use exchanger_store::{PgRateStore, PgStoreConfig};

/// Exchanger CLI
#[derive(Parser, Debug)]
#[command(name = "exchanger")]
#[command(about = "Currency rate import and conversion")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Import rates for every due provider
    Import {
        /// Import even when the refresh period has not elapsed
        #[arg(long)]
        force: bool,

        /// Keep importing on every tick until interrupted
        #[arg(long)]
        watch: bool,
    },

    /// Convert an amount with the active provider's rates
    Convert {
        amount: String,
        from: String,
        to: String,
    },

    /// Print a provider's stored rates
    Rates {
        provider: String,

        /// Print historical snapshots instead of the latest table
        #[arg(long)]
        historical: bool,

        /// Restrict historical snapshots to one date (YYYY-MM-DD)
        #[arg(long)]
        date: Option<NaiveDate>,

        /// Show example conversions of the provider's demo amount from this currency
        #[arg(long)]
        preview: Option<String>,
    },

    /// Pin a rate so imports leave it alone
    Pin {
        provider: String,
        source: String,
        target: String,
        value: Decimal,
    },

    /// Release a pinned rate
    Unpin {
        provider: String,
        source: String,
        target: String,
    },

    /// Run one import cycle and print its metrics
    Metrics,
}

fn init_logging(config: &ImporterConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    let layer = if config.json_logs {
        tracing_subscriber::fmt::layer().json().boxed()
    } else {
        tracing_subscriber::fmt::layer().pretty().boxed()
    };

    tracing_subscriber::registry().with(filter).with(layer).init();
}

async fn open_store(config: &ImporterConfig) -> anyhow::Result<SharedRateStore> {
    match &config.database_url {
        Some(url) => {
            let store = PgRateStore::connect(url, &PgStoreConfig::default()).await?;
            store.migrate().await?;
            store.spawn_listener().await?;
            Ok(Arc::new(store))
        }
        None => {
            info!("No DATABASE_URL, using in-memory rate store");
            Ok(Arc::new(MemoryRateStore::new()))
        }
    }
}

fn print_table(table: &RateTable) {
    for entry in table.entries() {
        let marker = if entry.manual { " (manual)" } else { "" };
        println!("{} {}{}", entry.pair(), entry.value, marker);
    }
}

fn print_report(report: &ImportReport) {
    for provider in &report.providers {
        match &provider.outcome {
            ImportOutcome::Skipped => println!("{}: not due", provider.provider),
            ImportOutcome::Imported { rows, failures } => {
                println!("{}: {} rates, {} failures", provider.provider, rows, failures.len())
            }
            ImportOutcome::Unchanged { failures } => {
                println!("{}: unchanged, {} failures", provider.provider, failures.len())
            }
            ImportOutcome::Failed { reason } => println!("{}: failed: {}", provider.provider, reason),
        }
    }
}

fn scheduler(
    config: &ImporterConfig,
    registry: Arc<ProviderRegistry>,
    store: SharedRateStore,
) -> anyhow::Result<ImportScheduler> {
    let fetcher = Arc::new(HttpRateFetcher::new(config.http_timeout)?);
    Ok(ImportScheduler::new(
        registry,
        store,
        fetcher,
        config.currencies.clone(),
    ))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Load configuration
    let config = ImporterConfig::from_env();
    init_logging(&config);
    if let Err(e) = config.validate() {
        error!(error = %e, "Invalid configuration");
        return Err(anyhow::anyhow!("Configuration error: {}", e));
    }

    let registry = Arc::new(
        config
            .load_providers()
            .with_context(|| format!("loading providers from {}", config.providers_file.display()))?,
    );
    let store = open_store(&config).await?;
    info!(providers = registry.len(), currencies = config.currencies.len(), "Exchanger ready");

    match args.command {
        Command::Import { force, watch: keep_running } => {
            let scheduler = scheduler(&config, registry, store)?;
            if !keep_running {
                let report = scheduler.run_import(force).await;
                print_report(&report);
                if config.metrics_enabled {
                    print!("{}", scheduler.metrics().to_prometheus());
                }
                return Ok(());
            }

            if force {
                print_report(&scheduler.run_import(true).await);
            }

            let (shutdown_tx, shutdown_rx) = watch::channel(false);
            tokio::spawn(async move {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    error!(error = %e, "Failed to listen for Ctrl+C");
                }
                info!("Shutdown signal received");
                let _ = shutdown_tx.send(true);
            });

            scheduler.run_forever(config.tick_interval, shutdown_rx).await;
            if config.metrics_enabled {
                print!("{}", scheduler.metrics().to_prometheus());
            }
        }

        Command::Convert { amount, from, to } => {
            let price = Money::from_str(&amount, Currency::parse(&from)?)?;
            let target = Currency::parse(&to)?;
            let service = ConversionService::new(registry, store);
            let conversion = service.convert_detailed(&price, &target).await?;
            println!("{} = {} (rate {})", conversion.input, conversion.output, conversion.rate);
        }

        Command::Rates {
            provider,
            historical,
            date,
            preview: preview_source,
        } => {
            let id = ProviderId::parse(&provider)?;
            if historical || date.is_some() {
                for (day, table) in store.get_historical(&id, date).await? {
                    println!("{day}");
                    print_table(&table);
                }
            } else {
                let table = store.get_latest(&id).await?;
                print_table(&table);

                if let Some(source) = preview_source {
                    let source = Currency::parse(&source)?;
                    let amount = registry
                        .get(&id)
                        .map(|p| p.demo_amount)
                        .unwrap_or(Decimal::ONE_HUNDRED);
                    for line in preview(&table, &source, amount) {
                        println!("{} {} = {}", amount, source, line.amount);
                    }
                }
            }
        }

        Command::Pin {
            provider,
            source,
            target,
            value,
        } => {
            let id = ProviderId::parse(&provider)?;
            let table = pin_rate(
                store.as_ref(),
                &id,
                &Currency::parse(&source)?,
                &Currency::parse(&target)?,
                value,
            )
            .await?;
            print_table(&table);
        }

        Command::Unpin {
            provider,
            source,
            target,
        } => {
            let id = ProviderId::parse(&provider)?;
            let table = unpin_rate(
                store.as_ref(),
                &id,
                &Currency::parse(&source)?,
                &Currency::parse(&target)?,
            )
            .await?;
            print_table(&table);
        }

        Command::Metrics => {
            let scheduler = scheduler(&config, registry, store)?;
            scheduler.run_import(false).await;
            print!("{}", scheduler.metrics().to_prometheus());
        }
    }

    Ok(())
}
