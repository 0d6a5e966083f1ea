#![forbid(unsafe_code)]

use std::sync::Arc;

use anyhow::Context;
use scorecard_probe_contracts::{columnar_database_name, Finding, ScorecardRef};
use scorecard_probe_engines::reconcile;
use scorecard_probe_storage::clickhouse::{ChHttpColStore, ChHttpConfig};
use scorecard_probe_storage::postgres::{mask_password, PgRelStore, PgRelStoreConfig};
use scorecard_probe_storage::ColStoreRepo;
use scorecard_probe_tools::cli::{parse_or_exit, VerifySyncArgs};
use scorecard_probe_tools::credentials::{CommandCredential, CredentialProvider};
use scorecard_probe_tools::logging::init_tracing;
use scorecard_probe_tools::report;
use scorecard_probe_tools::sync_session::fetch_and_close;

#[tokio::main]
async fn main() {
    init_tracing();
    let args: VerifySyncArgs = parse_or_exit();
    match run(args).await {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(err) => {
            eprintln!("ERROR: {err:#}");
            std::process::exit(1);
        }
    }
}

async fn run(args: VerifySyncArgs) -> anyhow::Result<bool> {
    let target = ScorecardRef::parse(&args.name).context("error parsing scorecard name")?;
    println!(
        "Parsed: customer={}, profile={}, scorecard={}",
        target.customer(),
        target.profile(),
        target.scorecard_id()
    );

    let conn_str = match args.explicit_pg() {
        Some(explicit) => explicit.to_string(),
        None => {
            let source = CommandCredential::pg_connection_string(
                &args.cluster,
                target.customer(),
                target.profile(),
            )?;
            println!(
                "Getting PostgreSQL connection string from {}...",
                source.command_line()
            );
            let conn_str = source
                .fetch()
                .await
                .context("error getting connection string (pass --pg to supply one)")?;
            println!("Got connection string: {}", mask_password(&conn_str));
            conn_str
        }
    };

    println!("\n--- Connecting to PostgreSQL ---");
    let pg = PgRelStore::connect(&conn_str, &PgRelStoreConfig::default())
        .await
        .context("error connecting to PostgreSQL")?;

    let database = columnar_database_name(target.customer(), target.profile());
    let connect_col = || -> anyhow::Result<Arc<dyn ColStoreRepo>> {
        println!("\n--- Connecting to ClickHouse (database: {database}) ---");
        Ok(Arc::new(ChHttpColStore::new(&ChHttpConfig::from_env(&database)?)))
    };
    let snapshot =
        fetch_and_close(Arc::new(pg), connect_col, &target, args.call_timeout()).await?;

    let found = reconcile(&snapshot);
    println!("{}", report::sync_report(&snapshot, &found));
    Ok(!found.iter().any(Finding::is_fail))
}
