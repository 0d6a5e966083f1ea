#![forbid(unsafe_code)]

use std::sync::Arc;

use anyhow::Context;
use scorecard_probe_adapter::{GrpcCoachingClient, GrpcConfig};
use scorecard_probe_contracts::Deadline;
use scorecard_probe_engines::{cancel_pair, RaceHarness};
use scorecard_probe_storage::clickhouse::{ChHttpColStore, ChHttpConfig};
use scorecard_probe_storage::ColStoreRepo;
use scorecard_probe_tools::cli::{parse_or_exit, AsyncOrderArgs};
use scorecard_probe_tools::credentials::{CommandCredential, CredentialProvider};
use scorecard_probe_tools::logging::init_tracing;
use scorecard_probe_tools::report;

#[tokio::main]
async fn main() {
    init_tracing();
    let args: AsyncOrderArgs = parse_or_exit();
    match run(args).await {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(err) => {
            eprintln!("ERROR: {err:#}");
            std::process::exit(1);
        }
    }
}

async fn run(args: AsyncOrderArgs) -> anyhow::Result<bool> {
    let config = args.race_config();
    println!("{}", report::banner(&config, &args.grpc_host));
    println!();

    let ch_config = ChHttpConfig::from_env(&args.columnar_database())?;

    println!("Getting auth token...");
    let token = CommandCredential::bearer_token(&args.cluster, &args.customer)?
        .fetch()
        .await
        .context("failed to get auth token")?;
    println!("Token acquired");
    println!();

    println!("Connecting to gRPC...");
    let coaching = GrpcCoachingClient::connect(&GrpcConfig::new(args.grpc_host.clone()), &token)
        .await
        .context("failed to connect to gRPC")?;
    println!("gRPC connected");

    println!("Connecting to ClickHouse...");
    let mirror = ChHttpColStore::new(&ch_config);
    mirror
        .ping(Deadline::after(config.call_timeout))
        .await
        .context("failed to connect to ClickHouse")?;
    println!("ClickHouse connected");
    println!();

    let (canceller, cancel) = cancel_pair();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received, abandoning the current iteration");
            canceller.cancel();
        }
    });

    let harness = RaceHarness::new(config, Arc::new(coaching), Arc::new(mirror), cancel)?;
    println!("Starting test iterations...");
    println!();
    let run = harness
        .run(|result| {
            tracing::debug!(
                iteration = result.iteration,
                create_ms = result.latency.create.as_millis() as u64,
                update_ms = result.latency.update.as_millis() as u64,
                submit_ms = result.latency.submit.as_millis() as u64,
                verify_ms = result.latency.verify.as_millis() as u64,
                "iteration latency"
            );
            println!("{}", report::iteration_line(result));
        })
        .await;

    println!();
    println!("{}", report::run_summary(&run));
    Ok(run.all_passed())
}
