use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use bytes::Bytes;
use tracing::{debug, error, info};

use common::{HashFn, Workload};

use crate::{map, reduce};

/// A map task: run the map function over one source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MapTask {
    /// Position of the source in the job's input list.
    pub map_id: u32,
    pub source: String,
    pub n_reduce: u32,
}

/// A reduce task: merge every map output for one partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReduceTask {
    pub partition: u32,
    pub n_map: u32,
}

/// What the coordinator answered to a task request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Task {
    Map(MapTask),
    Reduce(ReduceTask),
    /// Nothing to do right now, ask again later.
    Wait,
    /// Every task is done.
    Finished,
    /// The job was given up.
    Aborted(String),
}

/// Identifies a finished task when reporting back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskRef {
    Map(u32),
    Reduce(u32),
}

/// The worker's view of the coordinator.
#[tonic::async_trait]
pub trait TaskSource: Send {
    async fn request_task(&mut self) -> Result<Task>;

    async fn report_done(&mut self, task: TaskRef) -> Result<()>;
}

/// Everything an executor needs besides the task itself.
#[derive(Debug, Clone)]
pub struct TaskContext {
    pub workload: Workload,

    /// Auxiliary arguments handed to the map and reduce functions.
    pub aux: Bytes,

    /// Where intermediate and output files live.
    pub work_dir: PathBuf,

    /// Routes intermediate keys to partitions.
    pub hash: HashFn,

    /// Distinguishes this worker's temporary files from other attempts'.
    pub tag: String,
}

#[derive(Debug)]
pub struct MRWorker<S> {
    source: S,
    ctx: Arc<TaskContext>,
    poll_interval: Duration,
}

impl<S: TaskSource> MRWorker<S> {
    pub fn new(source: S, ctx: TaskContext, poll_interval: Duration) -> Self {
        Self {
            source,
            ctx: Arc::new(ctx),
            poll_interval,
        }
    }

    /// Pull and run tasks until the coordinator says the job is finished.
    ///
    /// Returns the number of tasks this worker completed. A failed task
    /// ends the loop with an error and is never reported, leaving the
    /// coordinator to reassign it once the lease runs out.
    pub async fn run(&mut self) -> Result<usize> {
        let mut completed = 0;

        loop {
            match self.source.request_task().await? {
                Task::Wait => {
                    debug!("No task available, waiting");
                    tokio::time::sleep(self.poll_interval).await;
                }
                Task::Finished => {
                    info!("Job finished after {completed} task(s) on this worker");
                    return Ok(completed);
                }
                Task::Aborted(reason) => bail!("coordinator aborted the job: {reason}"),
                Task::Map(task) => {
                    let done = TaskRef::Map(task.map_id);
                    self.execute(move |ctx| map::perform_map(&task, ctx)).await?;
                    self.source.report_done(done).await?;
                    completed += 1;
                }
                Task::Reduce(task) => {
                    let done = TaskRef::Reduce(task.partition);
                    self.execute(move |ctx| reduce::perform_reduce(&task, ctx))
                        .await?;
                    self.source.report_done(done).await?;
                    completed += 1;
                }
            }
        }
    }

    /// Run an executor on the blocking pool.
    async fn execute<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce(&TaskContext) -> common::error::Result<()> + Send + 'static,
    {
        let ctx = self.ctx.clone();
        let result = tokio::task::spawn_blocking(move || f(&ctx)).await?;

        if let Err(e) = &result {
            error!("Task attempt failed: {e}");
        }
        Ok(result?)
    }
}
