//! sqlctx - Main entry point.
//!
//! Opens a context factory per configured target and runs one subcommand
//! through transaction-scoped contexts.

use sqlctx::config::{CliCommand, Config};
use sqlctx::db::{ContextFactories, ContextFactory, ResultSets, WriteSession};
use sqlctx::{Command, DbResult, Query, ReadSession, Statement, TransactionSpec};
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Initialize the tracing subscriber for logging.
fn init_tracing(config: &Config) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let subscriber = tracing_subscriber::registry().with(filter);

    if config.json_logs {
        subscriber.with(fmt::layer().json().with_writer(std::io::stderr)).init();
    } else {
        subscriber
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}

struct Ping;

impl Query for Ping {
    type Output = i64;

    async fn select(&self, session: &mut ReadSession<'_>) -> DbResult<i64> {
        session.select_scalar(&Statement::new("SELECT 1")).await
    }
}

/// Ad-hoc SQL from the command line; every result set is kept.
struct RunSql(Statement);

impl Command for RunSql {
    type Output = ResultSets;

    async fn execute(&self, session: &mut WriteSession<'_>) -> DbResult<ResultSets> {
        session.select_multiple(&self.0).await
    }
}

async fn ping(registry: &ContextFactories) -> DbResult<bool> {
    let mut healthy = true;
    for id in registry.ids().await {
        let factory = registry.get(&id).await?;
        let result = async {
            let mut context = factory.create(None).await?;
            let value = context.query(&Ping).await;
            context.close().await;
            value
        }
        .await;

        match result {
            Ok(_) => println!("{id}: ok ({})", factory.db_type().display_name()),
            Err(e) => {
                healthy = false;
                println!("{id}: failed: {e}");
                if let Some(suggestion) = e.suggestion() {
                    println!("  hint: {suggestion}");
                }
            }
        }
    }
    Ok(healthy)
}

async fn run(factory: &ContextFactory, sql: String, transaction: bool, commit: bool) -> DbResult<()> {
    let spec = transaction.then(TransactionSpec::default);
    let mut context = factory.create(spec).await?;

    let outcome = context.execute(&RunSql(Statement::new(sql))).await;
    let mut sets = match outcome {
        Ok(sets) => sets,
        Err(e) => {
            context.close().await;
            return Err(e);
        }
    };

    let mut index = 0;
    while !sets.is_consumed() {
        for record in sets.read_records()? {
            println!(
                "{}",
                serde_json::json!({ "set": index, "row": record.to_json() })
            );
        }
        index += 1;
    }

    if commit {
        context.commit().await?;
        info!(target_id = %factory.id(), "Committed");
    }
    context.close().await;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Parse configuration from command line and environment
    let config = Config::parse_args();

    // Initialize logging
    init_tracing(&config);

    let Some(command) = config.command.clone() else {
        eprintln!("Error: a subcommand is required.");
        eprintln!();
        eprintln!("Usage: sqlctx --target <id>=<url>?schema=<qualifier> ping");
        eprintln!("       sqlctx --target <id>=<url>?schema=<qualifier> run --on <id> <SQL>");
        eprintln!();
        eprintln!("Examples:");
        eprintln!("  sqlctx --target local=sqlite:shop.db?schema= ping");
        eprintln!(
            "  sqlctx --target production=mssql://sa:pw@localhost/BikeStores?schema=production.&trust_cert=true \\"
        );
        eprintln!("         run --on production \"SELECT TOP 5 * FROM /*schema*/ products\"");
        std::process::exit(2);
    };

    info!("Starting sqlctx v{}", env!("CARGO_PKG_VERSION"));

    let registry = ContextFactories::from_config(&config).await?;

    let result: Result<(), Box<dyn std::error::Error>> = match command {
        CliCommand::Ping => match ping(&registry).await {
            Ok(true) => Ok(()),
            Ok(false) => Err("one or more targets failed".into()),
            Err(e) => Err(e.into()),
        },
        CliCommand::Run {
            target,
            transaction,
            commit,
            sql,
        } => match registry.get(&target).await {
            Ok(factory) => run(&factory, sql, transaction, commit)
                .await
                .map_err(Into::into),
            Err(e) => Err(e.into()),
        },
    };

    registry.close_all().await;

    if let Err(e) = &result {
        error!(error = %e, "Command failed");
    }
    result
}
