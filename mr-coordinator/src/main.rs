mod args;
use args::Args;

mod core;
use crate::core::{CoordinatorServer, MRCoordinator};

mod job;
use job::{JobSpec, JobState, JobStatus};

mod scheduler;
use scheduler::{Scheduler, SchedulerHandle};

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tonic::transport::Server;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Wait until the job either finished or failed.
async fn wait_for_job(scheduler: &SchedulerHandle) -> Result<JobStatus> {
    loop {
        let status = scheduler.status().await?;
        if status.done || status.failed.is_some() {
            return Ok(status);
        }
        debug!("{}", status.lines[0]);
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // Retrieve server configuration from command line.
    let args = Args::parse();

    let spec = JobSpec::new(args.inputs, args.n_reduce)?;
    let state = JobState::new(spec, args.max_attempts);
    let scheduler = Scheduler::spawn(state, Duration::from_secs(args.timeout_secs));

    // Configure address.
    let addr: SocketAddr = format!("[::1]:{}", args.port)
        .parse()
        .context("invalid listen address")?;
    info!("CoordinatorServer listening on {}", addr);

    let shutdown = CancellationToken::new();
    let mut server = {
        let shutdown = shutdown.clone();
        let service = CoordinatorServer::new(MRCoordinator::new(scheduler.clone()));
        tokio::spawn(async move {
            Server::builder()
                .add_service(service)
                .serve_with_shutdown(addr, async move { shutdown.cancelled().await })
                .await
        })
    };

    let status = tokio::select! {
        status = wait_for_job(&scheduler) => status?,
        served = &mut server => {
            served??;
            bail!("server stopped before the job ended");
        }
    };

    for line in &status.lines {
        info!("{line}");
    }

    // Workers still polling should see Finished or Aborted before we go.
    tokio::time::sleep(Duration::from_secs(args.linger_secs)).await;
    shutdown.cancel();
    server.await??;

    match status.failed {
        Some(reason) => bail!("job failed: {reason}"),
        None => {
            info!("Job done");
            Ok(())
        }
    }
}
