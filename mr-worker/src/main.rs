use std::time::Duration;

use anyhow::{anyhow, Result};
use bytes::Bytes;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

mod args;
use args::Args;

mod client;
use client::RpcTaskSource;

mod core;
use crate::core::{MRWorker, TaskContext};

mod map;
mod reduce;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();

    let workload = workload::try_named(&args.workload).ok_or_else(|| {
        anyhow!(
            "The workload `{}` is not a known workload (expected one of {:?})",
            args.workload,
            workload::NAMES
        )
    })?;

    let worker_id = args
        .worker_id
        .unwrap_or_else(|| format!("worker-{:08x}", rand::random::<u32>()));

    let ctx = TaskContext {
        workload,
        aux: Bytes::from(args.args.join(" ")),
        work_dir: args.work_dir,
        hash: common::ihash,
        tag: worker_id.clone(),
    };

    info!("Worker {worker_id} joining {} with workload `{}`", args.address, args.workload);

    let source = RpcTaskSource::connect(&args.address, worker_id, args.rpc_retries)?;
    let mut worker = MRWorker::new(source, ctx, Duration::from_millis(args.poll_interval_ms));
    worker.run().await?;

    Ok(())
}
