#![forbid(unsafe_code)]

//! The connected half of `verify_sync`: ping both stores, fetch the snapshot,
//! and close the PostgreSQL pool whichever way that goes.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use scorecard_probe_contracts::{Deadline, ScorecardRef};
use scorecard_probe_engines::{Reconciler, SyncSnapshot};
use scorecard_probe_storage::{ColStoreRepo, RelStoreRepo};

/// `connect_col` runs only after PostgreSQL answers its ping. The pool is
/// closed before returning on every path.
pub async fn fetch_and_close<C>(
    rel: Arc<dyn RelStoreRepo>,
    connect_col: C,
    target: &ScorecardRef,
    call_timeout: Duration,
) -> anyhow::Result<SyncSnapshot>
where
    C: FnOnce() -> anyhow::Result<Arc<dyn ColStoreRepo>>,
{
    let fetched = fetch(Arc::clone(&rel), connect_col, target, call_timeout).await;
    rel.close().await;
    tracing::debug!(ok = fetched.is_ok(), "postgres pool closed");
    fetched
}

async fn fetch<C>(
    rel: Arc<dyn RelStoreRepo>,
    connect_col: C,
    target: &ScorecardRef,
    call_timeout: Duration,
) -> anyhow::Result<SyncSnapshot>
where
    C: FnOnce() -> anyhow::Result<Arc<dyn ColStoreRepo>>,
{
    rel.ping(Deadline::after(call_timeout))
        .await
        .context("error pinging PostgreSQL")?;
    println!("PostgreSQL connected successfully");

    let col = connect_col()?;
    col.ping(Deadline::after(call_timeout))
        .await
        .context("error connecting to ClickHouse")?;
    println!("ClickHouse connected successfully");

    Reconciler::new(rel, col, call_timeout)
        .fetch(target)
        .await
        .context("error querying stores")
}
