//! ledger-daemon: Headless session over a shared expense ledger.
//!
//! Uses the same ledger-core as every other client, with the ledger kept in
//! a JSON file that several processes may open at once.

use anyhow::{Context, Result, bail};
use chrono::{Local, NaiveDate};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use ledger_core::ledger::{self, RecordFilter, SortDirection, SortKey};
use ledger_core::{
    Category, EventSubscription, Frequency, Instance, LedgerEvent, Record, RecordId,
    Scheduler, SessionContext, SyncCoordinator, Template, WriteOutcome, YearMonth,
};
use ledger_daemon::{Config, JsonFileStore, follow};

#[derive(Parser, Debug)]
#[command(name = "ledger-daemon")]
#[command(about = "Shared rental expense ledger")]
struct Args {
    /// Directory holding config.json
    #[arg(long, default_value = ".ledger")]
    config: PathBuf,

    /// Ledger file (overrides the configured path)
    #[arg(long)]
    ledger: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Keep a session open: expand recurring expenses once, then follow changes
    Run,

    /// Print totals
    Summary {
        /// Day the year/month totals are relative to (default: today)
        #[arg(long)]
        as_of: Option<NaiveDate>,
    },

    /// List expenses
    List {
        #[arg(long)]
        category: Option<String>,
        /// Property reference
        #[arg(long)]
        property: Option<String>,
        /// Search description, property name, vendor and notes
        #[arg(long)]
        query: Option<String>,
        /// date, amount, category, description or property
        #[arg(long, default_value = "date")]
        sort: SortKey,
        /// Reverse the default direction for the sort key
        #[arg(long)]
        reverse: bool,
        /// Also list recurring templates
        #[arg(long)]
        templates: bool,
    },

    /// Record an expense
    Add {
        #[arg(long)]
        amount: Option<f64>,
        /// Mileage entry; the amount is derived from the mileage rate
        #[arg(long, conflicts_with = "amount")]
        miles: Option<f64>,
        #[arg(long)]
        date: Option<NaiveDate>,
        #[arg(long)]
        category: Option<String>,
        #[arg(long, default_value = "")]
        description: String,
        #[arg(long, default_value = "")]
        vendor: String,
        #[arg(long, default_value = "")]
        property: String,
        #[arg(long, default_value = "")]
        property_name: String,
        #[arg(long, default_value = "")]
        receipt_url: String,
    },

    /// Define a recurring expense
    Recurring {
        #[arg(long)]
        amount: f64,
        /// monthly, quarterly or annually
        #[arg(long, default_value = "monthly", value_parser = parse_frequency)]
        frequency: Frequency,
        #[arg(long, default_value_t = 1)]
        due_day: u32,
        /// First month (YYYY-MM); defaults to the current month
        #[arg(long)]
        start: Option<YearMonth>,
        #[arg(long)]
        category: Option<String>,
        #[arg(long, default_value = "")]
        description: String,
        #[arg(long, default_value = "")]
        vendor: String,
        #[arg(long, default_value = "")]
        property: String,
        #[arg(long, default_value = "")]
        property_name: String,
    },

    /// Delete a record
    Remove {
        #[arg(long)]
        id: String,
    },

    /// Generate a template's expense for one month
    Generate {
        #[arg(long)]
        template: String,
        /// YYYY-MM (default: current month)
        #[arg(long)]
        month: Option<YearMonth>,
    },
}

fn parse_frequency(s: &str) -> Result<Frequency, String> {
    Frequency::ALL
        .into_iter()
        .find(|f| f.as_str() == s)
        .ok_or_else(|| format!("unknown frequency: {}", s))
}

/// One session over the shared ledger.
struct Daemon {
    coordinator: SyncCoordinator<JsonFileStore>,
    scheduler: Scheduler,
    /// Keeps event logging alive
    _events: EventSubscription,
}

impl Daemon {
    /// Open the ledger and wait for the first snapshot.
    async fn open(config: &Config) -> Result<Self> {
        let store = JsonFileStore::open(&config.ledger_path, &config.user)
            .with_context(|| format!("Failed to open ledger {:?}", config.ledger_path))?;
        let mut coordinator = SyncCoordinator::new(store, SessionContext::new(&config.user));
        let events = coordinator.events().subscribe(log_event);

        coordinator.start().await?;
        coordinator.wait_until_ready().await?;
        info!(
            "Ledger ready: {} record(s) at rev {:?}",
            coordinator.records().len(),
            coordinator.revision()
        );

        Ok(Self {
            coordinator,
            scheduler: Scheduler::new(config.settle_delay()),
            _events: events,
        })
    }

    /// Follow the ledger until ctrl-c, running recurring expansion once
    /// the session has settled.
    async fn run(&mut self) -> Result<()> {
        info!("Daemon running. Press Ctrl+C to stop.");
        let shutdown = async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for ctrl-c: {}", e);
                std::future::pending::<()>().await;
            }
        };
        follow(&mut self.coordinator, &self.scheduler, || Local::now().date_naive(), shutdown).await;
        Ok(())
    }
}

fn log_event(event: LedgerEvent) {
    let json = serde_json::to_string(&event).unwrap_or_else(|_| format!("{:?}", event));
    match event {
        LedgerEvent::WriteFailed { .. }
        | LedgerEvent::DeleteRefused { .. }
        | LedgerEvent::ExpansionFailed { .. } => warn!("{}", json),
        _ => debug!("{}", json),
    }
}

fn report(outcome: WriteOutcome, done: &str) -> Result<()> {
    match outcome {
        WriteOutcome::Committed(origin) => {
            println!("{} ({})", done, origin);
            Ok(())
        }
        WriteOutcome::Unchanged => {
            println!("Nothing to do");
            Ok(())
        }
        WriteOutcome::Failed { origin, reason } => bail!("Failed to save {}: {}", origin, reason),
    }
}

fn print_instance(instance: &Instance) {
    println!(
        "{}  {}  {:>10.2}  {:<12}  {}  {}",
        instance.id,
        instance.date,
        instance.amount,
        instance.category.label(),
        instance.property_name,
        instance.description
    );
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Set up logging - respects RUST_LOG env var, defaults to info (or debug with --verbose)
    let default_filter = if args.verbose {
        "debug,ledger_daemon=debug,ledger_core=debug"
    } else {
        "info,ledger_daemon=info,ledger_core=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let mut config = Config::load(&args.config)?;
    if let Some(ledger) = args.ledger {
        config.ledger_path = ledger;
    }
    info!("Ledger path: {:?}", config.ledger_path);

    let mut daemon = Daemon::open(&config).await?;
    let today = Local::now().date_naive();

    match args.command {
        Command::Run => daemon.run().await?,

        Command::Summary { as_of } => {
            let summary = ledger::summarize(daemon.coordinator.records(), as_of.unwrap_or(today));
            println!("Total:          {:>12.2}", summary.total);
            println!("Year to date:   {:>12.2}", summary.year_to_date);
            println!("Month to date:  {:>12.2}", summary.month_to_date);
            println!(
                "{} expense(s), {} recurring template(s)",
                summary.instance_count, summary.template_count
            );
        }

        Command::List {
            category,
            property,
            query,
            sort,
            reverse,
            templates,
        } => {
            let filter = RecordFilter {
                category: category.as_deref().map(Category::from_key),
                property_ref: property,
                query,
            };
            let records = daemon.coordinator.records();
            let mut instances = filter.apply(records);
            let direction = match (sort.default_direction(), reverse) {
                (direction, false) => direction,
                (SortDirection::Ascending, true) => SortDirection::Descending,
                (SortDirection::Descending, true) => SortDirection::Ascending,
            };
            ledger::sort_instances(&mut instances, sort, direction);
            for instance in instances {
                print_instance(instance);
            }

            if templates {
                for template in ledger::templates(records) {
                    println!(
                        "{}  {:?} day {}  {:>10.2}  {:<12}  {}  {}",
                        template.id,
                        template.frequency,
                        template.due_day,
                        template.amount,
                        template.category.label(),
                        template.property_name,
                        template.description
                    );
                }
            }
        }

        Command::Add {
            amount,
            miles,
            date,
            category,
            description,
            vendor,
            property,
            property_name,
            receipt_url,
        } => {
            let date = date.unwrap_or(today);
            let mut instance = match (miles, amount) {
                (Some(miles), _) => Instance::mileage(date, miles),
                (None, Some(amount)) => Instance::new(date, amount),
                (None, None) => bail!("Either --amount or --miles is required"),
            };
            if let Some(category) = category {
                instance.category = Category::from_key(&category);
            }
            instance.description = description;
            instance.vendor = vendor;
            instance.property_ref = property;
            instance.property_name = property_name;
            instance.receipt_url = receipt_url;

            let id = instance.id.clone();
            let outcome = daemon.coordinator.add(Record::from(instance)).await?;
            report(outcome, &format!("Added {}", id))?;
        }

        Command::Recurring {
            amount,
            frequency,
            due_day,
            start,
            category,
            description,
            vendor,
            property,
            property_name,
        } => {
            let mut template = Template::new(frequency, due_day, amount, today);
            template.effective_start = start;
            if let Some(category) = category {
                template.category = Category::from_key(&category);
            }
            template.description = description;
            template.vendor = vendor;
            template.property_ref = property;
            template.property_name = property_name;

            let id = template.id.clone();
            let outcome = daemon.coordinator.add(Record::from(template)).await?;
            report(outcome, &format!("Added recurring {}", id))?;
        }

        Command::Remove { id } => {
            let outcome = daemon.coordinator.remove(&RecordId::from(id.as_str())).await?;
            report(outcome, &format!("Removed {}", id))?;
        }

        Command::Generate { template, month } => {
            let month = month.unwrap_or_else(|| YearMonth::of(today));
            let outcome = daemon
                .coordinator
                .generate_for_period(&RecordId::from(template.as_str()), month)
                .await?;
            report(outcome, &format!("Generated {} for {}", template, month))?;
        }
    }

    Ok(())
}
