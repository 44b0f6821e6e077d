use std::collections::HashSet;
use std::fmt;

use thiserror::Error;

/// Kind of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskKind {
    Map,
    Reduce,
}

/// Identifies a task within a job.
///
/// `index` is the map id (position of the source in the input list) for
/// map tasks and the partition for reduce tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskId {
    pub kind: TaskKind,
    pub index: u32,
}

impl TaskId {
    pub fn map(index: u32) -> Self {
        Self {
            kind: TaskKind::Map,
            index,
        }
    }

    pub fn reduce(index: u32) -> Self {
        Self {
            kind: TaskKind::Reduce,
            index,
        }
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            TaskKind::Map => write!(f, "map {}", self.index),
            TaskKind::Reduce => write!(f, "reduce {}", self.index),
        }
    }
}

/// State of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    /// Waiting to be handed out.
    Pending,

    /// Handed out, no completion seen yet.
    Running,

    /// Completed. Never left once entered.
    Done,
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskStatus::Pending => "Pending",
            TaskStatus::Running => "Running",
            TaskStatus::Done => "Done",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone)]
pub struct TaskRecord {
    pub status: TaskStatus,

    /// Bumped on every assignment. A timeout only applies to the
    /// assignment that armed it.
    pub generation: u64,

    /// How many times the task was handed out.
    pub attempts: u32,
}

impl Default for TaskRecord {
    fn default() -> Self {
        Self {
            status: TaskStatus::Pending,
            generation: 0,
            attempts: 0,
        }
    }
}

/// One assignment of a task, as seen by its timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Lease {
    pub task: TaskId,
    pub generation: u64,
}

/// Answer to a task request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Assignment {
    Map {
        lease: Lease,
        source: String,
        n_reduce: u32,
    },
    Reduce {
        lease: Lease,
        n_map: u32,
    },
    /// Nothing assignable right now, but the job is not finished.
    Wait,
    /// Every task is done.
    Finished,
    /// The job failed and will not finish.
    Aborted(String),
}

impl Assignment {
    /// The lease handed out, if any.
    pub fn lease(&self) -> Option<Lease> {
        match self {
            Assignment::Map { lease, .. } | Assignment::Reduce { lease, .. } => Some(*lease),
            _ => None,
        }
    }
}

/// What a timeout did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expiry {
    /// The task went back to Pending.
    Reverted,

    /// The task finished or was reassigned since; nothing changed.
    Stale,

    /// The task ran out of attempts and the job failed.
    Failed(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum JobError {
    #[error("a job needs at least one partition")]
    NoPartitions,

    #[error("{0} does not exist")]
    UnknownTask(TaskId),

    #[error("{0} reported before every map task finished")]
    BarrierOpen(TaskId),
}

/// The immutable description of a job.
#[derive(Debug, Clone)]
pub struct JobSpec {
    sources: Vec<String>,
    n_reduce: u32,
}

impl JobSpec {
    /// Sources appearing more than once are only kept at their first
    /// position, so each source maps to exactly one map task.
    pub fn new(sources: Vec<String>, n_reduce: u32) -> Result<Self, JobError> {
        if n_reduce == 0 {
            return Err(JobError::NoPartitions);
        }

        let mut seen = HashSet::new();
        let sources = sources
            .into_iter()
            .filter(|source| seen.insert(source.clone()))
            .collect();

        Ok(Self { sources, n_reduce })
    }

    pub fn sources(&self) -> &[String] {
        &self.sources
    }

    pub fn n_map(&self) -> u32 {
        self.sources.len() as u32
    }

    pub fn n_reduce(&self) -> u32 {
        self.n_reduce
    }
}

fn first_pending(tasks: &[TaskRecord]) -> Option<usize> {
    tasks
        .iter()
        .position(|record| record.status == TaskStatus::Pending)
}

/// Snapshot of a job for reporting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobStatus {
    pub done: bool,
    pub failed: Option<String>,
    pub lines: Vec<String>,
}

/// Status of every task of a job.
///
/// All scheduling decisions are made here. The caller is responsible for
/// serializing access, and for arming a timeout for every lease handed
/// out by [`JobState::assign`].
#[derive(Debug)]
pub struct JobState {
    spec: JobSpec,
    map_tasks: Vec<TaskRecord>,
    reduce_tasks: Vec<TaskRecord>,

    /// Give up on the job once a task timed out this many times.
    max_attempts: Option<u32>,

    failure: Option<String>,
}

impl JobState {
    /// Every task starts out Pending.
    pub fn new(spec: JobSpec, max_attempts: Option<u32>) -> Self {
        Self {
            map_tasks: vec![TaskRecord::default(); spec.n_map() as usize],
            reduce_tasks: vec![TaskRecord::default(); spec.n_reduce() as usize],
            spec,
            max_attempts,
            failure: None,
        }
    }

    pub fn spec(&self) -> &JobSpec {
        &self.spec
    }

    pub fn record(&self, task: TaskId) -> Option<&TaskRecord> {
        match task.kind {
            TaskKind::Map => self.map_tasks.get(task.index as usize),
            TaskKind::Reduce => self.reduce_tasks.get(task.index as usize),
        }
    }

    fn record_mut(&mut self, task: TaskId) -> Result<&mut TaskRecord, JobError> {
        let record = match task.kind {
            TaskKind::Map => self.map_tasks.get_mut(task.index as usize),
            TaskKind::Reduce => self.reduce_tasks.get_mut(task.index as usize),
        };
        record.ok_or(JobError::UnknownTask(task))
    }

    /// Whether every map task is done, i.e. reduce tasks may start.
    pub fn maps_done(&self) -> bool {
        self.map_tasks
            .iter()
            .all(|record| record.status == TaskStatus::Done)
    }

    /// Whether every task of the job is done.
    pub fn is_done(&self) -> bool {
        self.maps_done()
            && self
                .reduce_tasks
                .iter()
                .all(|record| record.status == TaskStatus::Done)
    }

    /// Why the job failed, if it did.
    pub fn failure(&self) -> Option<&str> {
        self.failure.as_deref()
    }

    /// Pick the next task to run and mark it Running.
    ///
    /// Map tasks go out first, in input order. Reduce tasks go out in
    /// partition order and only once every map task is done.
    pub fn assign(&mut self) -> Assignment {
        if let Some(reason) = &self.failure {
            return Assignment::Aborted(reason.clone());
        }

        if let Some(index) = first_pending(&self.map_tasks) {
            let lease = self.start(TaskId::map(index as u32));
            return Assignment::Map {
                lease,
                source: self.spec.sources[index].clone(),
                n_reduce: self.spec.n_reduce,
            };
        }

        if self.maps_done() {
            if let Some(index) = first_pending(&self.reduce_tasks) {
                let lease = self.start(TaskId::reduce(index as u32));
                return Assignment::Reduce {
                    lease,
                    n_map: self.spec.n_map(),
                };
            }
        }

        if self.is_done() {
            Assignment::Finished
        } else {
            Assignment::Wait
        }
    }

    fn start(&mut self, task: TaskId) -> Lease {
        let record = match task.kind {
            TaskKind::Map => &mut self.map_tasks[task.index as usize],
            TaskKind::Reduce => &mut self.reduce_tasks[task.index as usize],
        };
        record.status = TaskStatus::Running;
        record.generation += 1;
        record.attempts += 1;

        Lease {
            task,
            generation: record.generation,
        }
    }

    /// Mark a task Done, whoever reports it.
    ///
    /// Returns `false` if it already was. Late reports from attempts that
    /// were presumed dead are accepted: the work they describe is complete.
    pub fn complete(&mut self, task: TaskId) -> Result<bool, JobError> {
        if task.kind == TaskKind::Reduce && self.record(task).is_some() && !self.maps_done() {
            return Err(JobError::BarrierOpen(task));
        }

        let record = self.record_mut(task)?;
        if record.status == TaskStatus::Done {
            return Ok(false);
        }
        record.status = TaskStatus::Done;
        Ok(true)
    }

    /// The timeout of `lease` ran out.
    ///
    /// The task goes back to Pending only if it is still running under this
    /// very lease.
    pub fn expire(&mut self, lease: Lease) -> Expiry {
        let max_attempts = self.max_attempts;
        let Ok(record) = self.record_mut(lease.task) else {
            return Expiry::Stale;
        };

        if record.status != TaskStatus::Running || record.generation != lease.generation {
            return Expiry::Stale;
        }
        record.status = TaskStatus::Pending;

        match max_attempts {
            Some(max) if record.attempts >= max => {
                let reason = format!("{} timed out {} times", lease.task, record.attempts);
                self.failure.get_or_insert(reason.clone());
                Expiry::Failed(reason)
            }
            _ => Expiry::Reverted,
        }
    }

    /// Human readable task table.
    pub fn status(&self) -> JobStatus {
        let all = self.map_tasks.iter().chain(self.reduce_tasks.iter());
        let count = |status: TaskStatus| all.clone().filter(|r| r.status == status).count();

        let mut lines = vec![format!(
            "{} map / {} reduce tasks: {} done, {} running, {} pending",
            self.map_tasks.len(),
            self.reduce_tasks.len(),
            count(TaskStatus::Done),
            count(TaskStatus::Running),
            count(TaskStatus::Pending),
        )];

        for (index, record) in self.map_tasks.iter().enumerate() {
            lines.push(format!(
                "{:<12} {:<8} attempts={:<3} {}",
                TaskId::map(index as u32).to_string(),
                record.status.to_string(),
                record.attempts,
                self.spec.sources[index]
            ));
        }
        for (index, record) in self.reduce_tasks.iter().enumerate() {
            lines.push(format!(
                "{:<12} {:<8} attempts={}",
                TaskId::reduce(index as u32).to_string(),
                record.status.to_string(),
                record.attempts
            ));
        }

        JobStatus {
            done: self.is_done(),
            failed: self.failure.clone(),
            lines,
        }
    }
}
