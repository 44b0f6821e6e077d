//
// Import gRPC stubs/definitions.
//
pub mod coordinator {
    tonic::include_proto!("coordinator");
}

use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use rand::Rng;
use tonic::transport::Channel;
use tonic::{Code, Request, Status};
use tracing::warn;

use coordinator::coordinator_client::CoordinatorClient;
use coordinator::task_assignment::Assignment;
use coordinator::{TaskAssignment, TaskKind, TaskRequest};

use crate::core::{MapTask, ReduceTask, Task, TaskRef, TaskSource};

const BASE_DELAY: Duration = Duration::from_millis(200);
const MAX_DELAY: Duration = Duration::from_secs(5);

impl TryFrom<TaskAssignment> for Task {
    type Error = anyhow::Error;

    fn try_from(value: TaskAssignment) -> Result<Self> {
        let task = match value.assignment {
            Some(Assignment::Map(map)) => {
                if map.n_reduce == 0 {
                    bail!("map task {} has no partitions", map.map_id);
                }
                Task::Map(MapTask {
                    map_id: map.map_id,
                    source: map.source,
                    n_reduce: map.n_reduce,
                })
            }
            Some(Assignment::Reduce(reduce)) => Task::Reduce(ReduceTask {
                partition: reduce.partition,
                n_map: reduce.n_map,
            }),
            Some(Assignment::Wait(_)) => Task::Wait,
            Some(Assignment::Finished(_)) => Task::Finished,
            Some(Assignment::Aborted(aborted)) => Task::Aborted(aborted.reason),
            None => bail!("coordinator sent an empty assignment"),
        };
        Ok(task)
    }
}

/// Whether a failed call may succeed if sent again.
fn retryable(status: &Status) -> bool {
    !matches!(
        status.code(),
        Code::InvalidArgument | Code::NotFound | Code::FailedPrecondition | Code::Unimplemented
    )
}

/// Exponential backoff with jitter, capped at [`MAX_DELAY`].
fn retry_delay(attempt: u32) -> Duration {
    let exp = BASE_DELAY.saturating_mul(1 << attempt.min(16));
    let jitter = Duration::from_millis(rand::thread_rng().gen_range(0..100));
    exp.min(MAX_DELAY) + jitter
}

/// Talks to the coordinator over gRPC, retrying transport failures.
#[derive(Debug, Clone)]
pub struct RpcTaskSource {
    client: CoordinatorClient<Channel>,
    worker_id: String,
    retries: u32,
}

impl RpcTaskSource {
    /// The connection is made on first use, so a coordinator that is still
    /// starting up only costs a retry.
    pub fn connect(address: &str, worker_id: String, retries: u32) -> Result<Self> {
        let channel = Channel::from_shared(address.to_string())
            .with_context(|| format!("invalid coordinator address `{address}`"))?
            .connect_lazy();

        Ok(Self {
            client: CoordinatorClient::new(channel),
            worker_id,
            retries,
        })
    }

    async fn backoff(&self, call: &str, attempt: u32, status: &Status) -> Result<()> {
        if attempt >= self.retries || !retryable(status) {
            return Err(anyhow!(status.clone()).context(format!("{call} failed")));
        }

        let delay = retry_delay(attempt);
        warn!(
            "{call} failed ({}), retrying in {delay:?} [{}/{}]",
            status.message(),
            attempt + 1,
            self.retries
        );
        tokio::time::sleep(delay).await;
        Ok(())
    }
}

#[tonic::async_trait]
impl TaskSource for RpcTaskSource {
    async fn request_task(&mut self) -> Result<Task> {
        let mut attempt = 0;
        loop {
            let request = Request::new(TaskRequest {
                worker_id: self.worker_id.clone(),
            });
            match self.client.request_task(request).await {
                Ok(response) => return response.into_inner().try_into(),
                Err(status) => self.backoff("RequestTask", attempt, &status).await?,
            }
            attempt += 1;
        }
    }

    async fn report_done(&mut self, task: TaskRef) -> Result<()> {
        let (kind, index) = match task {
            TaskRef::Map(map_id) => (TaskKind::Map, map_id),
            TaskRef::Reduce(partition) => (TaskKind::Reduce, partition),
        };

        let mut attempt = 0;
        loop {
            let request = Request::new(coordinator::TaskRef {
                kind: kind as i32,
                index,
                worker_id: self.worker_id.clone(),
            });
            match self.client.report_done(request).await {
                Ok(_) => return Ok(()),
                Err(status) => self.backoff("ReportDone", attempt, &status).await?,
            }
            attempt += 1;
        }
    }
}
