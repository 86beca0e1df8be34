//! Dedicated worker threads fed by FIFO job queues
//!
//! A [`JobScheduler`] turns functions into *job families*. Each family owns exactly one OS thread
//! and one queue. Posting a job appends it to the queue and wakes the thread, which then drains the
//! queue in order, calling the registered function once per job.
//!
//! Families can be flushed synchronously. A flush marks the family so that everything dequeued from
//! then on is discarded instead of executed, wakes the worker and blocks until the worker reports an
//! empty queue. Depending on the `force_flush` flag the marker is either cleared afterwards (the
//! family keeps accepting work) or left in place (all later posts are dropped), which is what
//! [`JobScheduler::unregister_job_family`] relies on before it stops the thread.

mod handle;
mod job_scheduler;

pub use handle::JobHandle;
pub use job_scheduler::{
    FlushStatus, JobScheduler, JobStatus, SchedulerError, DEFAULT_SCHEDULER_CAPACITY,
};
