use chrono::{NaiveDate, Utc};
use clap::{Parser, ValueEnum};
use miette::{IntoDiagnostic, Result};
use orderflow::application::engine::{Actor, OrderEngine};
use orderflow::application::reports::{OrderFilter, SalesRange};
use orderflow::config::{EngineConfig, Environment};
use orderflow::domain::payment::CallbackOutcome;
use orderflow::domain::ports::{MovementFilter, Stores};
use orderflow::error::OrderError;
use orderflow::infrastructure::in_memory::in_memory_stores;
#[cfg(feature = "storage-rocksdb")]
use orderflow::infrastructure::rocksdb::RocksDBStore;
use orderflow::infrastructure::sandbox::{self, SandboxProvider};
use orderflow::interfaces::csv::command_reader::{Command, CommandReader, ScriptedCallback};
use orderflow::interfaces::csv::report_writer::ReportWriter;
use orderflow::telemetry;
use std::fs::File;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Report {
    Orders,
    Inventory,
    Movements,
    Sales,
    DailySales,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Mode {
    Sandbox,
    Live,
}

impl From<Mode> for Environment {
    fn from(mode: Mode) -> Self {
        match mode {
            Mode::Sandbox => Environment::Sandbox,
            Mode::Live => Environment::Live,
        }
    }
}

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Input command script (CSV)
    input: PathBuf,

    /// Path to persistent database (optional). Requires the `storage-rocksdb` feature.
    #[arg(long, env = "ORDERFLOW_DB_PATH")]
    db_path: Option<PathBuf>,

    /// Seconds a payment attempt may stay unanswered before the sweep cancels it.
    #[arg(long)]
    payment_timeout_secs: Option<u64>,

    /// Provider environment; `live` requires every ORDERFLOW_*_SECRET to be set.
    #[arg(long = "env", env = "ORDERFLOW_ENV", value_enum, default_value_t = Mode::Sandbox)]
    mode: Mode,

    /// Report written to stdout once the script has run.
    #[arg(long, value_enum, default_value_t = Report::Orders)]
    report: Report,

    /// First day (YYYY-MM-DD, UTC) counted by the sales reports.
    #[arg(long)]
    from: Option<NaiveDate>,

    /// Last day (inclusive) counted by the sales reports.
    #[arg(long)]
    to: Option<NaiveDate>,

    /// Log at debug level (overridden by RUST_LOG).
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    telemetry::init(cli.verbose);

    let mut config = EngineConfig::from_env(cli.mode.into()).into_diagnostic()?;
    if let Some(secs) = cli.payment_timeout_secs {
        config = config.with_payment_timeout(Duration::from_secs(secs));
    }

    let stores = open_stores(cli.db_path)?;
    let engine = OrderEngine::new(config, stores, Arc::new(SandboxProvider::new()));

    let file = File::open(cli.input).into_diagnostic()?;
    let reader = CommandReader::new(file);
    for command in reader.commands() {
        match command {
            Ok(command) => {
                if let Err(e) = run(&engine, command).await {
                    eprintln!("Error processing command: {}", e);
                }
            }
            Err(e) => {
                eprintln!("Error reading command: {}", e);
            }
        }
    }

    let range = SalesRange {
        from: cli.from,
        to: cli.to,
    };
    let stdout = io::stdout();
    let mut writer = ReportWriter::new(stdout.lock());
    match cli.report {
        Report::Orders => {
            let orders = engine.orders(OrderFilter::default()).await.into_diagnostic()?;
            writer.write_orders(&orders).into_diagnostic()?;
        }
        Report::Inventory => {
            let records = engine.inventory().await.into_diagnostic()?;
            writer.write_inventory(&records).into_diagnostic()?;
        }
        Report::Movements => {
            let movements = engine
                .movements(MovementFilter::default())
                .await
                .into_diagnostic()?;
            writer.write_movements(&movements).into_diagnostic()?;
        }
        Report::Sales => {
            let report = engine.sales_report(range).await.into_diagnostic()?;
            writer.write_sales(&report).into_diagnostic()?;
        }
        Report::DailySales => {
            let report = engine.sales_report(range).await.into_diagnostic()?;
            writer.write_daily_sales(&report).into_diagnostic()?;
        }
    }

    Ok(())
}

#[cfg(feature = "storage-rocksdb")]
fn open_stores(db_path: Option<PathBuf>) -> Result<Stores> {
    match db_path {
        Some(path) => Ok(RocksDBStore::open(path).into_diagnostic()?.into_stores()),
        None => Ok(in_memory_stores()),
    }
}

#[cfg(not(feature = "storage-rocksdb"))]
fn open_stores(db_path: Option<PathBuf>) -> Result<Stores> {
    if let Some(path) = db_path {
        tracing::warn!(
            path = %path.display(),
            "persistent storage requested via --db-path, but the 'storage-rocksdb' feature is not enabled; falling back to in-memory storage"
        );
    }
    Ok(in_memory_stores())
}

async fn run(engine: &OrderEngine, command: Command) -> orderflow::error::Result<()> {
    match command {
        Command::Product {
            product_id,
            price,
            stock,
        } => {
            engine.register_product(product_id, price, stock, 0).await?;
        }
        Command::Threshold {
            product_id,
            threshold,
        } => {
            engine.set_low_stock_threshold(product_id, threshold).await?;
        }
        Command::Checkout { user_id, cart } => {
            engine.convert_cart(user_id, &cart).await?;
        }
        Command::Pay { order_id, provider } => {
            engine.initiate_payment(order_id, provider).await?;
        }
        Command::Callback {
            order_id,
            provider,
            callback,
        } => {
            let order = engine.order(order_id).await?;
            let variant = provider.or(order.provider).ok_or_else(|| {
                OrderError::InvalidCommand(format!("order {order_id} has no payment provider"))
            })?;
            let reference = order.provider_reference.ok_or_else(|| {
                OrderError::InvalidCommand(format!("order {order_id} has no payment reference"))
            })?;
            let secret = &engine.config().providers.for_variant(variant).callback_secret;
            let (outcome, secret) = match callback {
                ScriptedCallback::Outcome(outcome) => (outcome, secret.clone()),
                ScriptedCallback::Forged => {
                    (CallbackOutcome::Confirmed, format!("{secret}-forged"))
                }
            };
            let body = sandbox::callback_body(variant, order_id, &reference, outcome);
            let raw = sandbox::signed_callback(&secret, body)?;
            engine.receive_callback(variant, &raw).await?;
        }
        Command::Cancel { order_id, user_id } => {
            let actor = user_id.map_or(Actor::Admin, Actor::User);
            engine.cancel_order(order_id, actor).await?;
        }
        Command::Ship { order_id } => {
            engine.mark_shipped(order_id).await?;
        }
        Command::Deliver { order_id } => {
            engine.mark_delivered(order_id).await?;
        }
        Command::Restock {
            product_id,
            quantity,
            reason,
        } => {
            engine.restock(product_id, quantity, &reason).await?;
        }
        Command::Adjust {
            product_id,
            delta,
            reason,
        } => {
            engine.adjust(product_id, delta, &reason).await?;
        }
        Command::Sweep => {
            // As if the payment window had already elapsed.
            let window = chrono::Duration::from_std(engine.config().payment_timeout)
                .map_err(|e| OrderError::InvalidCommand(e.to_string()))?;
            engine.sweep_at(Utc::now() + window).await?;
        }
    }
    Ok(())
}
