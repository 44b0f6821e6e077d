use tonic::{Request, Response, Status};
use tracing::debug;

pub use coordinator::coordinator_server::{Coordinator, CoordinatorServer};
use coordinator::task_assignment::Assignment as Message;
use coordinator::{
    Aborted, Finished, MapTask, ReduceTask, ReportDoneResponse, StatusRequest, StatusResponse,
    TaskAssignment, TaskRef, TaskRequest, Wait,
};
pub mod coordinator {
    tonic::include_proto!("coordinator");
}

use crate::job::{Assignment, JobError, TaskId, TaskKind};
use crate::scheduler::{SchedulerError, SchedulerHandle};

impl From<Assignment> for TaskAssignment {
    fn from(assignment: Assignment) -> Self {
        let message = match assignment {
            Assignment::Map {
                lease,
                source,
                n_reduce,
            } => Message::Map(MapTask {
                map_id: lease.task.index,
                source,
                n_reduce,
            }),
            Assignment::Reduce { lease, n_map } => Message::Reduce(ReduceTask {
                partition: lease.task.index,
                n_map,
            }),
            Assignment::Wait => Message::Wait(Wait {}),
            Assignment::Finished => Message::Finished(Finished {}),
            Assignment::Aborted(reason) => Message::Aborted(Aborted { reason }),
        };

        TaskAssignment {
            assignment: Some(message),
        }
    }
}

fn to_status(error: SchedulerError) -> Status {
    match error {
        SchedulerError::Job(e @ JobError::UnknownTask(_)) => Status::not_found(e.to_string()),
        SchedulerError::Job(e @ JobError::BarrierOpen(_)) => {
            Status::failed_precondition(e.to_string())
        }
        SchedulerError::Job(e) => Status::invalid_argument(e.to_string()),
        SchedulerError::Stopped => Status::unavailable(SchedulerError::Stopped.to_string()),
    }
}

fn task_id(task: &TaskRef) -> Result<TaskId, Status> {
    let kind = match coordinator::TaskKind::try_from(task.kind) {
        Ok(coordinator::TaskKind::Map) => TaskKind::Map,
        Ok(coordinator::TaskKind::Reduce) => TaskKind::Reduce,
        Err(_) => return Err(Status::invalid_argument("unknown task kind")),
    };
    Ok(TaskId {
        kind,
        index: task.index,
    })
}

/// The gRPC face of the scheduler.
#[derive(Debug, Clone)]
pub struct MRCoordinator {
    scheduler: SchedulerHandle,
}

impl MRCoordinator {
    pub fn new(scheduler: SchedulerHandle) -> Self {
        Self { scheduler }
    }
}

#[tonic::async_trait]
impl Coordinator for MRCoordinator {
    /// Worker asks for work.
    async fn request_task(
        &self,
        request: Request<TaskRequest>,
    ) -> Result<Response<TaskAssignment>, Status> {
        let worker_id = request.into_inner().worker_id;

        let assignment = self
            .scheduler
            .request_task(worker_id)
            .await
            .map_err(to_status)?;

        Ok(Response::new(assignment.into()))
    }

    /// Worker finished a task.
    async fn report_done(
        &self,
        request: Request<TaskRef>,
    ) -> Result<Response<ReportDoneResponse>, Status> {
        let task = request.into_inner();
        let id = task_id(&task)?;

        let fresh = self
            .scheduler
            .report_done(id, task.worker_id)
            .await
            .map_err(to_status)?;
        if !fresh {
            debug!("{id} was already done");
        }

        Ok(Response::new(ReportDoneResponse {}))
    }

    async fn status(
        &self,
        _: Request<StatusRequest>,
    ) -> Result<Response<StatusResponse>, Status> {
        let status = self.scheduler.status().await.map_err(to_status)?;

        let reply = StatusResponse {
            done: status.done,
            failed: status.failed.is_some(),
            data: status
                .failed
                .map(|reason| format!("Failed: {reason}"))
                .into_iter()
                .chain(status.lines)
                .collect(),
        };
        Ok(Response::new(reply))
    }
}
