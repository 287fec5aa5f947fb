pub mod job;
pub mod queue;
pub mod store;

pub use job::{
    CandidateFailure, CandidateResult, Job, JobError, JobInput, JobOptions, JobResult, JobStage,
    JobStatus, JobStatusView, JobSummary, Priority, StageTimings,
};
pub use queue::{Lease, NackOutcome, QueueDepth, TaskItem, TaskQueue};
pub use store::JobStore;
