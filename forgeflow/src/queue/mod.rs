//! Job admission, prioritization, dispatch, retry, and dead-lettering.

mod job;
mod queue;
mod rate_limit;

pub use job::{Job, JobState, JobStatus, Tier};
pub use queue::JobQueue;
pub use rate_limit::DequeueRateLimiter;
