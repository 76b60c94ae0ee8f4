use clap::Parser;
use escrow_engine::application::payments::PaymentService;
use escrow_engine::config::EngineConfig;
use escrow_engine::domain::ports::TransactionStore;
use escrow_engine::infrastructure::in_memory::{
    InMemoryAccountDirectory, InMemoryLedger, InMemoryServerConfigs,
};
use escrow_engine::infrastructure::in_memory_context;
use escrow_engine::infrastructure::simulated_rail::SimulatedRail;
use escrow_engine::interfaces::csv::command_reader::CommandReader;
use escrow_engine::interfaces::csv::transaction_writer::TransactionWriter;
use escrow_engine::interfaces::driver::ScriptDriver;
use escrow_engine::interfaces::json::{load_accounts, load_server_configs};
use escrow_engine::logging::{LogFormat, init_logging};
use miette::{IntoDiagnostic, Result};
use std::fs::File;
use std::io;
use std::path::PathBuf;
use tracing::info;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Payment script (CSV: op, ref, sender, recipient, amount, method, server)
    input: PathBuf,

    /// User accounts and their payment methods (JSON array)
    #[arg(long)]
    accounts: PathBuf,

    /// Per-server payment policies (JSON array)
    #[arg(long)]
    servers: Option<PathBuf>,

    /// Engine configuration file (TOML, JSON or YAML)
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long, value_enum, default_value_t = LogFormat::Pretty)]
    log_format: LogFormat,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging("warn", cli.log_format);

    let config = EngineConfig::load(cli.config.as_deref()).into_diagnostic()?;
    let accounts =
        InMemoryAccountDirectory::with_accounts(load_accounts(&cli.accounts).into_diagnostic()?);
    let servers = match &cli.servers {
        Some(path) => {
            InMemoryServerConfigs::with_configs(load_server_configs(path).into_diagnostic()?)
        }
        None => InMemoryServerConfigs::new(),
    };

    let ledger = InMemoryLedger::new();
    let rail = SimulatedRail::new();
    let service = PaymentService::new(config, in_memory_context(&ledger, accounts, servers, &rail));
    service.spawn_maintenance();

    let file = File::open(&cli.input).into_diagnostic()?;
    let mut driver = ScriptDriver::new(&service);
    for (row, command) in CommandReader::new(file).commands().enumerate() {
        match command {
            Ok(command) => {
                if let Err(e) = driver.apply(command).await {
                    eprintln!("Error processing row {}: {}", row + 1, e);
                }
            }
            Err(e) => {
                eprintln!("Error reading row {}: {}", row + 1, e);
            }
        }
    }

    let transactions = ledger.all().await.into_diagnostic()?;
    info!(count = transactions.len(), "script finished");

    let stdout = io::stdout();
    let mut writer = TransactionWriter::new(stdout.lock());
    writer
        .write_transactions(transactions.iter().map(|tx| (driver.label(tx.id), tx)))
        .into_diagnostic()?;

    service.shutdown();
    Ok(())
}
