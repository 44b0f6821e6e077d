//! Owner of the job state.
//!
//! A single task holds the [`JobState`] and applies requests, completion
//! reports and timeouts one message at a time, so every decision sees a
//! consistent table and no lock is needed. Each lease handed out arms a
//! timer task that posts an `Expire` message back after the grace period.

use std::time::Duration;

use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::job::{Assignment, Expiry, JobError, JobState, JobStatus, Lease, TaskId};

const CHANNEL_CAPACITY: usize = 256;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchedulerError {
    #[error(transparent)]
    Job(#[from] JobError),

    #[error("the scheduler has stopped")]
    Stopped,
}

#[derive(Debug)]
enum Command {
    RequestTask {
        worker_id: String,
        reply: oneshot::Sender<Assignment>,
    },
    ReportDone {
        task: TaskId,
        worker_id: String,
        reply: oneshot::Sender<Result<bool, JobError>>,
    },
    Expire {
        lease: Lease,
    },
    Status {
        reply: oneshot::Sender<JobStatus>,
    },
}

/// Cheap to clone; the scheduler stops once every handle is dropped.
#[derive(Debug, Clone)]
pub struct SchedulerHandle {
    sender: mpsc::Sender<Command>,
}

impl SchedulerHandle {
    async fn call<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, SchedulerError> {
        let (reply, response) = oneshot::channel();
        self.sender
            .send(command(reply))
            .await
            .map_err(|_| SchedulerError::Stopped)?;
        response.await.map_err(|_| SchedulerError::Stopped)
    }

    /// Get the next task for `worker_id`.
    pub async fn request_task(&self, worker_id: String) -> Result<Assignment, SchedulerError> {
        self.call(|reply| Command::RequestTask { worker_id, reply })
            .await
    }

    /// Record that `task` finished. Returns `false` for a repeated report.
    pub async fn report_done(&self, task: TaskId, worker_id: String) -> Result<bool, SchedulerError> {
        let completed = self
            .call(|reply| Command::ReportDone {
                task,
                worker_id,
                reply,
            })
            .await??;
        Ok(completed)
    }

    pub async fn status(&self) -> Result<JobStatus, SchedulerError> {
        self.call(|reply| Command::Status { reply }).await
    }

    /// Whether every task of the job is done.
    pub async fn done(&self) -> Result<bool, SchedulerError> {
        Ok(self.status().await?.done)
    }
}

pub struct Scheduler {
    state: JobState,
    timeout: Duration,
    receiver: mpsc::Receiver<Command>,

    /// Lets timers post back without keeping the scheduler alive.
    sender: mpsc::WeakSender<Command>,

    /// Cancels outstanding timers when the scheduler stops.
    timers: CancellationToken,
}

impl Scheduler {
    /// Start a scheduler for `state` on the current runtime.
    ///
    /// A task that is still not done `timeout` after being handed out is
    /// made available again.
    pub fn spawn(state: JobState, timeout: Duration) -> SchedulerHandle {
        let (sender, receiver) = mpsc::channel(CHANNEL_CAPACITY);
        let scheduler = Scheduler {
            state,
            timeout,
            receiver,
            sender: sender.downgrade(),
            timers: CancellationToken::new(),
        };
        tokio::spawn(scheduler.run());

        SchedulerHandle { sender }
    }

    async fn run(mut self) {
        let spec = self.state.spec();
        info!(
            "Scheduling {} map and {} reduce tasks, timeout {:?}",
            spec.n_map(),
            spec.n_reduce(),
            self.timeout
        );

        while let Some(command) = self.receiver.recv().await {
            self.handle(command);
        }

        self.timers.cancel();
        debug!("Scheduler stopped");
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::RequestTask { worker_id, reply } => {
                let assignment = self.state.assign();
                match &assignment {
                    Assignment::Map { lease, source, .. } => {
                        info!("Assigned {} (`{source}`) to {worker_id}", lease.task);
                        self.arm_timer(*lease);
                    }
                    Assignment::Reduce { lease, .. } => {
                        info!("Assigned {} to {worker_id}", lease.task);
                        self.arm_timer(*lease);
                    }
                    Assignment::Wait => debug!("Nothing to assign to {worker_id}"),
                    Assignment::Finished => debug!("Told {worker_id} the job is finished"),
                    Assignment::Aborted(_) => debug!("Told {worker_id} the job was aborted"),
                }
                let _ = reply.send(assignment);
            }
            Command::ReportDone {
                task,
                worker_id,
                reply,
            } => {
                let result = self.state.complete(task);
                match &result {
                    Ok(true) => {
                        info!("{task} done by {worker_id}");
                        if self.state.is_done() {
                            info!("Every task is done");
                        }
                    }
                    Ok(false) => debug!("Ignoring repeated report of {task} from {worker_id}"),
                    Err(e) => warn!("Rejected report from {worker_id}: {e}"),
                }
                let _ = reply.send(result);
            }
            Command::Expire { lease } => match self.state.expire(lease) {
                Expiry::Reverted => warn!(
                    "{} not done after {:?}, making it available again",
                    lease.task, self.timeout
                ),
                Expiry::Stale => {}
                Expiry::Failed(reason) => error!("Giving up on the job: {reason}"),
            },
            Command::Status { reply } => {
                let _ = reply.send(self.state.status());
            }
        }
    }

    fn arm_timer(&self, lease: Lease) {
        let sender = self.sender.clone();
        let cancelled = self.timers.clone();
        let timeout = self.timeout;

        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(timeout) => {}
                _ = cancelled.cancelled() => return,
            }
            if let Some(sender) = sender.upgrade() {
                let _ = sender.send(Command::Expire { lease }).await;
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::JobSpec;

    const TIMEOUT: Duration = Duration::from_secs(10);

    fn spawn(sources: &[&str], n_reduce: u32) -> SchedulerHandle {
        let sources = sources.iter().map(|s| s.to_string()).collect();
        let spec = JobSpec::new(sources, n_reduce).unwrap();
        Scheduler::spawn(JobState::new(spec, None), TIMEOUT)
    }

    async fn lease(handle: &SchedulerHandle, worker: &str) -> Lease {
        handle
            .request_task(worker.into())
            .await
            .unwrap()
            .lease()
            .expect("expected a task")
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_task_is_reassigned_after_timeout() {
        let handle = spawn(&["a"], 1);

        let first = lease(&handle, "w1").await;
        assert_eq!(first.task, TaskId::map(0));
        assert_eq!(handle.request_task("w2".into()).await.unwrap(), Assignment::Wait);

        tokio::time::sleep(TIMEOUT - Duration::from_millis(1)).await;
        assert_eq!(handle.request_task("w2".into()).await.unwrap(), Assignment::Wait);

        tokio::time::sleep(Duration::from_millis(2)).await;
        let second = lease(&handle, "w2").await;
        assert_eq!(second.task, first.task);
        assert_eq!(second.generation, first.generation + 1);
    }

    #[tokio::test(start_paused = true)]
    async fn late_report_after_reassignment_is_harmless() {
        let handle = spawn(&["a"], 1);

        let slow = lease(&handle, "slow").await;
        tokio::time::sleep(TIMEOUT + Duration::from_millis(1)).await;
        let fast = lease(&handle, "fast").await;
        assert_eq!(fast.task, slow.task);

        assert!(handle.report_done(fast.task, "fast".into()).await.unwrap());
        assert!(!handle.report_done(slow.task, "slow".into()).await.unwrap());
        assert!(!handle.done().await.unwrap());

        let reduce = lease(&handle, "fast").await;
        assert_eq!(reduce.task, TaskId::reduce(0));
        assert!(handle.report_done(reduce.task, "fast".into()).await.unwrap());

        assert!(handle.done().await.unwrap());
        assert_eq!(handle.request_task("slow".into()).await.unwrap(), Assignment::Finished);
    }

    #[tokio::test(start_paused = true)]
    async fn completed_task_survives_its_timeout() {
        let handle = spawn(&["a", "b"], 1);

        let a = lease(&handle, "w1").await;
        handle.report_done(a.task, "w1".into()).await.unwrap();
        let b = lease(&handle, "w2").await;
        assert_eq!(b.task, TaskId::map(1));

        tokio::time::sleep(TIMEOUT + Duration::from_millis(1)).await;

        // Only the unfinished map comes back.
        let again = lease(&handle, "w3").await;
        assert_eq!(again.task, TaskId::map(1));
        assert_eq!(handle.request_task("w3".into()).await.unwrap(), Assignment::Wait);
    }

    #[tokio::test(start_paused = true)]
    async fn early_reduce_report_is_rejected() {
        let handle = spawn(&["a"], 1);
        let err = handle
            .report_done(TaskId::reduce(0), "w1".into())
            .await
            .unwrap_err();
        assert_eq!(err, SchedulerError::Job(JobError::BarrierOpen(TaskId::reduce(0))));
    }

    #[tokio::test(start_paused = true)]
    async fn attempt_cap_aborts_the_job() {
        let spec = JobSpec::new(vec!["a".into()], 1).unwrap();
        let handle = Scheduler::spawn(JobState::new(spec, Some(1)), TIMEOUT);

        lease(&handle, "w1").await;
        tokio::time::sleep(TIMEOUT + Duration::from_millis(1)).await;

        let status = handle.status().await.unwrap();
        assert!(!status.done);
        assert!(status.failed.is_some());
        assert!(matches!(
            handle.request_task("w2".into()).await.unwrap(),
            Assignment::Aborted(_)
        ));
    }

    #[tokio::test]
    async fn concurrent_requests_never_share_a_task() {
        let handle = spawn(&["a", "b", "c", "d", "e", "f", "g", "h"], 2);

        let requests = (0..16).map(|i| {
            let handle = handle.clone();
            tokio::spawn(async move { handle.request_task(format!("w{i}")).await.unwrap() })
        });

        let mut handed_out = Vec::new();
        for request in requests {
            if let Some(lease) = request.await.unwrap().lease() {
                handed_out.push(lease.task);
            }
        }

        handed_out.sort_by_key(|task| task.index);
        let expected: Vec<_> = (0..8).map(TaskId::map).collect();
        assert_eq!(handed_out, expected);
    }
}
