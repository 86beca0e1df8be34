use super::JobHandle;
use crate::library::helpers::lock;
use crate::library::ErrorCode;
use std::collections::VecDeque;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle, ThreadId};
use thiserror::Error;
use tracing::{debug, error, info, trace, warn};

/// Number of job families a scheduler can host if nothing else is specified
pub const DEFAULT_SCHEDULER_CAPACITY: usize = 100;

type JobFunc<T> = Box<dyn Fn(T) + Send + Sync + 'static>;

/// Error type for job family management
#[derive(Error, Debug)]
pub enum SchedulerError {
    /// Every slot of the scheduler is occupied
    #[error("no free slot for job family {name} (capacity {capacity})")]
    NoFreeSlot {
        /// Name of the family that could not be registered
        name: String,
        /// Number of slots of the scheduler
        capacity: usize,
    },
    /// The operating system refused to create the worker thread
    #[error("unable to spawn worker thread for job family {name}")]
    ThreadSpawn {
        /// Name of the family that could not be registered
        name: String,
        /// Underlying spawn failure
        #[source]
        source: std::io::Error,
    },
    /// The handle is stale or has never been issued by this scheduler
    #[error("job handle {0} does not refer to a registered job family")]
    UnknownHandle(JobHandle),
    /// The family is being torn down
    #[error("job family {0} is not initialized")]
    NotInitialized(JobHandle),
    /// A job attempted to flush or unregister the family it is running on
    #[error("job family {0} can not be flushed from its own worker thread")]
    SelfFlush(JobHandle),
}

impl SchedulerError {
    /// Result code classification of the error
    pub fn code(&self) -> ErrorCode {
        match self {
            SchedulerError::SelfFlush(_) => ErrorCode::InvalidState,
            _ => ErrorCode::Failed,
        }
    }
}

/// Whether a family executes or discards what it dequeues
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushStatus {
    /// Dequeued jobs are executed
    NoFlush,
    /// Dequeued jobs are discarded
    FlushRequested,
}

/// Lifecycle state of an individual posted job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    /// Queued and not yet looked at by the worker
    Submitted,
    /// Dequeued and about to be executed
    Ready,
    /// Dequeued while a flush was in progress, will be dropped
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WorkerStatus {
    Initialized,
    Stopped,
}

struct RuntimeJob<T> {
    payload: T,
    // Carried along for callers, the queue is strictly FIFO.
    request_id: u64,
    status: JobStatus,
}

struct Control {
    status: WorkerStatus,
    job_pending: bool,
    flush_pending: bool,
}

/// One registered function, its queue and the thread draining it
struct JobFamily<T> {
    handle: JobHandle,
    name: String,
    func: JobFunc<T>,

    control: Mutex<Control>,
    work_ready: Condvar,
    flushed: Condvar,

    queue: Mutex<VecDeque<RuntimeJob<T>>>,
    // Doubles as the submission lock: posts hold it while enqueueing.
    flush_status: Mutex<FlushStatus>,

    thread: Mutex<Option<JoinHandle<()>>>,
    thread_id: Mutex<Option<ThreadId>>,
}

impl<T> JobFamily<T>
where
    T: Send + 'static,
{
    fn new(handle: JobHandle, name: &str, func: JobFunc<T>) -> Self {
        Self {
            handle,
            name: name.to_owned(),
            func,
            control: Mutex::new(Control {
                status: WorkerStatus::Initialized,
                job_pending: false,
                flush_pending: false,
            }),
            work_ready: Condvar::new(),
            flushed: Condvar::new(),
            queue: Mutex::new(VecDeque::new()),
            flush_status: Mutex::new(FlushStatus::NoFlush),
            thread: Mutex::new(None),
            thread_id: Mutex::new(None),
        }
    }

    fn wait<'a>(condvar: &Condvar, guard: MutexGuard<'a, Control>) -> MutexGuard<'a, Control> {
        condvar.wait(guard).unwrap_or_else(PoisonError::into_inner)
    }

    fn is_initialized(&self) -> bool {
        lock(&self.control).status == WorkerStatus::Initialized
    }

    fn is_worker_thread(&self) -> bool {
        *lock(&self.thread_id) == Some(thread::current().id())
    }

    fn is_queue_empty(&self) -> bool {
        lock(&self.queue).is_empty()
    }

    /// Body of the dedicated worker thread
    fn run(&self) {
        let mut control = lock(&self.control);

        loop {
            while control.status != WorkerStatus::Stopped && !control.job_pending {
                control = Self::wait(&self.work_ready, control);
            }

            if control.status == WorkerStatus::Stopped {
                break;
            }

            control.job_pending = false;
            drop(control);

            self.process_queue();

            control = lock(&self.control);
            if control.flush_pending && self.is_queue_empty() {
                control.flush_pending = false;
                self.flushed.notify_all();
            }
        }

        // Nobody may stay blocked on a flush of a family that no longer drains its queue
        control.flush_pending = false;
        self.flushed.notify_all();

        debug!(family = %self.name, handle = %self.handle, "Worker thread exited");
    }

    fn process_queue(&self) {
        loop {
            let mut job = match lock(&self.queue).pop_front() {
                Some(job) => job,
                None => break,
            };

            if job.status == JobStatus::Submitted {
                job.status = match *lock(&self.flush_status) {
                    FlushStatus::FlushRequested => JobStatus::Stopped,
                    FlushStatus::NoFlush => JobStatus::Ready,
                };
            }

            match job.status {
                JobStatus::Ready => self.dispatch(job),
                _ => trace!(family = %self.name, request_id = job.request_id, "Discarded job during flush"),
            }
        }
    }

    fn dispatch(&self, job: RuntimeJob<T>) {
        let request_id = job.request_id;
        let payload = job.payload;

        if catch_unwind(AssertUnwindSafe(|| (self.func)(payload))).is_err() {
            error!(family = %self.name, request_id, "Job panicked during execution");
        }
    }

    /// Marks the pending flag and wakes the worker
    fn trigger(&self) {
        let mut control = lock(&self.control);
        control.job_pending = true;
        self.work_ready.notify_one();
    }

    fn post(&self, payload: T, request_id: u64) -> Result<(), SchedulerError> {
        if !self.is_initialized() {
            return Err(SchedulerError::NotInitialized(self.handle));
        }

        {
            let _submission = lock(&self.flush_status);
            lock(&self.queue).push_back(RuntimeJob {
                payload,
                request_id,
                status: JobStatus::Submitted,
            });
        }

        self.trigger();

        Ok(())
    }

    fn flush(&self, force_flush: bool) -> Result<(), SchedulerError> {
        if self.is_worker_thread() {
            return Err(SchedulerError::SelfFlush(self.handle));
        }

        if !self.is_initialized() {
            return Err(SchedulerError::NotInitialized(self.handle));
        }

        *lock(&self.flush_status) = FlushStatus::FlushRequested;

        {
            let mut control = lock(&self.control);
            control.flush_pending = true;
            control.job_pending = true;
            self.work_ready.notify_one();

            while control.flush_pending && control.status != WorkerStatus::Stopped {
                control = Self::wait(&self.flushed, control);
            }
        }

        if force_flush {
            *lock(&self.flush_status) = FlushStatus::NoFlush;
        }

        trace!(family = %self.name, handle = %self.handle, force_flush, "Flushed job family");

        Ok(())
    }

    /// Stops the worker thread and waits for it to exit
    fn stop(&self) {
        *lock(&self.flush_status) = FlushStatus::NoFlush;

        {
            let mut control = lock(&self.control);
            control.status = WorkerStatus::Stopped;
            self.work_ready.notify_one();
        }

        let thread = lock(&self.thread).take();
        if let Some(thread) = thread {
            if thread.thread().id() == thread::current().id() {
                warn!(family = %self.name, "Job family torn down from its own worker thread, detaching");
            } else if thread.join().is_err() {
                error!(family = %self.name, "Worker thread terminated abnormally");
            }
        }

        lock(&self.queue).clear();
    }
}

/// Registry of job families with a fixed number of slots
///
/// All families of one scheduler share the payload type `T`. Components which need different payloads
/// simply own more than one scheduler.
pub struct JobScheduler<T> {
    name: String,
    capacity: usize,
    slots: Mutex<Vec<Option<Arc<JobFamily<T>>>>>,
    generation: AtomicU32,
}

impl<T> JobScheduler<T>
where
    T: Send + 'static,
{
    /// Creates a new scheduler with [`DEFAULT_SCHEDULER_CAPACITY`] slots
    pub fn new(name: &str) -> Self {
        Self::with_capacity(name, DEFAULT_SCHEDULER_CAPACITY)
    }

    /// Creates a new scheduler which can host up to `capacity` families at once
    pub fn with_capacity(name: &str, capacity: usize) -> Self {
        info!(scheduler = name, capacity, "Initialized job scheduler");

        Self {
            name: name.to_owned(),
            capacity,
            slots: Mutex::new((0..capacity).map(|_| None).collect()),
            generation: AtomicU32::new(1),
        }
    }

    /// Name given to the scheduler, used as a prefix for worker thread names
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of currently registered families
    pub fn registered_families(&self) -> usize {
        lock(&self.slots).iter().filter(|slot| slot.is_some()).count()
    }

    fn next_generation(&self) -> u32 {
        loop {
            let generation = self.generation.fetch_add(1, Ordering::SeqCst);
            if generation != 0 {
                return generation;
            }
        }
    }

    fn family(&self, handle: JobHandle) -> Result<Arc<JobFamily<T>>, SchedulerError> {
        lock(&self.slots)
            .get(handle.slot())
            .and_then(|slot| slot.as_ref())
            .filter(|family| family.handle == handle)
            .cloned()
            .ok_or(SchedulerError::UnknownHandle(handle))
    }

    /// Registers a function as a new job family and spawns its dedicated worker thread
    pub fn register_job_family<F>(&self, func: F, name: &str) -> Result<JobHandle, SchedulerError>
    where
        F: Fn(T) + Send + Sync + 'static,
    {
        let mut slots = lock(&self.slots);

        let slot = match slots.iter().position(Option::is_none) {
            Some(slot) => slot,
            None => {
                error!(scheduler = %self.name, family = name, "No free slot left for job family");
                return Err(SchedulerError::NoFreeSlot {
                    name: name.to_owned(),
                    capacity: self.capacity,
                });
            }
        };

        let handle = JobHandle::new(self.next_generation(), slot as u32);
        let family = Arc::new(JobFamily::new(handle, name, Box::new(func)));
        let worker = family.clone();

        let thread = thread::Builder::new()
            .name(format!("{}-{}", self.name, slot))
            .spawn(move || worker.run())
            .map_err(|source| {
                error!(scheduler = %self.name, family = name, %source, "Unable to spawn worker thread");
                SchedulerError::ThreadSpawn {
                    name: name.to_owned(),
                    source,
                }
            })?;

        *lock(&family.thread_id) = Some(thread.thread().id());
        *lock(&family.thread) = Some(thread);
        slots[slot] = Some(family);

        debug!(scheduler = %self.name, family = name, %handle, "Registered job family");

        Ok(handle)
    }

    /// Flushes and stops the family, joins its thread and frees the slot
    pub fn unregister_job_family(&self, handle: JobHandle) -> Result<(), SchedulerError> {
        let family = self.family(handle)?;

        family.flush(false)?;
        family.stop();

        {
            let mut slots = lock(&self.slots);
            if let Some(slot) = slots.get_mut(handle.slot()) {
                if slot.as_ref().map(|f| f.handle) == Some(handle) {
                    *slot = None;
                }
            }
        }

        debug!(
            scheduler = %self.name,
            family = %family.name,
            %handle,
            remaining = self.registered_families(),
            "Unregistered job family"
        );

        Ok(())
    }

    /// Appends a job to the family's queue and wakes its worker
    pub fn post_job(
        &self,
        handle: JobHandle,
        payload: T,
        request_id: u64,
    ) -> Result<(), SchedulerError> {
        self.family(handle)?.post(payload, request_id)
    }

    /// Blocks until the family's queue has been drained
    ///
    /// Jobs which the worker dequeues while the flush is in progress are discarded. With `force_flush`
    /// set the family resumes normal operation afterwards, otherwise everything posted later is discarded too.
    pub fn flush_job(&self, handle: JobHandle, force_flush: bool) -> Result<(), SchedulerError> {
        self.family(handle)?.flush(force_flush)
    }

    /// Whether the family's queue is currently empty
    ///
    /// A job that is being executed has already left the queue and does not count.
    pub fn is_job_available(&self, handle: JobHandle) -> bool {
        self.family(handle)
            .map(|family| family.is_queue_empty())
            .unwrap_or(false)
    }

    /// Current flush marker of the family
    pub fn flush_status(&self, handle: JobHandle) -> Result<FlushStatus, SchedulerError> {
        Ok(*lock(&self.family(handle)?.flush_status))
    }

    /// Drops all queued jobs whose payload equals the given one, returning how many were removed
    pub fn remove_job(&self, handle: JobHandle, payload: &T) -> Result<usize, SchedulerError>
    where
        T: PartialEq,
    {
        let family = self.family(handle)?;
        let mut queue = lock(&family.queue);
        let before = queue.len();
        queue.retain(|job| job.payload != *payload);

        Ok(before - queue.len())
    }

    /// Payloads of all jobs that are queued and have not been looked at by the worker
    pub fn posted_jobs(&self, handle: JobHandle) -> Result<Vec<T>, SchedulerError>
    where
        T: Clone,
    {
        let family = self.family(handle)?;
        let queue = lock(&family.queue);

        Ok(queue
            .iter()
            .filter(|job| job.status == JobStatus::Submitted)
            .map(|job| job.payload.clone())
            .collect())
    }
}

impl<T> fmt::Debug for JobScheduler<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobScheduler")
            .field("name", &self.name)
            .field("capacity", &self.capacity)
            .finish()
    }
}

impl<T> Drop for JobScheduler<T> {
    fn drop(&mut self) {
        let families: Vec<Arc<JobFamily<T>>> = lock(&self.slots)
            .iter_mut()
            .filter_map(Option::take)
            .collect();

        for family in families {
            // The family methods need `T: Send`, which Drop can not require
            *lock(&family.flush_status) = FlushStatus::FlushRequested;
            {
                let mut control = lock(&family.control);
                control.status = WorkerStatus::Stopped;
                family.work_ready.notify_one();
            }

            let thread = lock(&family.thread).take();
            if let Some(thread) = thread {
                if thread.thread().id() != thread::current().id() && thread.join().is_err() {
                    error!(family = %family.name, "Worker thread terminated abnormally");
                }
            }

            lock(&family.queue).clear();
        }
    }
}

#[cfg(test)]
mod does {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::mpsc::{channel, Receiver, Sender};
    use std::time::Duration;

    const RECV_TIMEOUT: Duration = Duration::from_secs(5);

    fn collecting_scheduler(
        name: &str,
    ) -> (JobScheduler<usize>, JobHandle, Receiver<usize>) {
        let scheduler = JobScheduler::new(name);
        let (tx, rx) = channel();
        let tx = Mutex::new(tx);
        let handle = scheduler
            .register_job_family(move |n| lock(&tx).send(n).unwrap(), "collect")
            .unwrap();

        (scheduler, handle, rx)
    }

    /// Family whose first job blocks until the returned sender is used
    fn gated_scheduler() -> (JobScheduler<usize>, JobHandle, Sender<()>, Receiver<usize>) {
        let scheduler = JobScheduler::new("gated");
        let (gate_tx, gate_rx) = channel::<()>();
        let (tx, rx) = channel();
        let gate = Mutex::new(gate_rx);
        let tx = Mutex::new(tx);

        let handle = scheduler
            .register_job_family(
                move |n| {
                    if n == 0 {
                        lock(&gate).recv_timeout(RECV_TIMEOUT).ok();
                    }
                    lock(&tx).send(n).unwrap();
                },
                "gated",
            )
            .unwrap();

        (scheduler, handle, gate_tx, rx)
    }

    #[test]
    fn dispatch_in_post_order() {
        let (scheduler, handle, rx) = collecting_scheduler("fifo");

        for n in 0..200 {
            scheduler.post_job(handle, n, n as u64).unwrap();
        }

        let received: Vec<usize> = (0..200)
            .map(|_| rx.recv_timeout(RECV_TIMEOUT).unwrap())
            .collect();

        assert_eq!(received, (0..200).collect::<Vec<_>>());
        assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());
    }

    #[test]
    fn ignore_request_id_for_ordering() {
        let (scheduler, handle, rx) = collecting_scheduler("request-id");

        scheduler.post_job(handle, 1, 30).unwrap();
        scheduler.post_job(handle, 2, 20).unwrap();
        scheduler.post_job(handle, 3, 10).unwrap();

        let received: Vec<usize> = (0..3)
            .map(|_| rx.recv_timeout(RECV_TIMEOUT).unwrap())
            .collect();

        assert_eq!(received, vec![1, 2, 3]);
    }

    #[test]
    fn drain_queue_on_flush() {
        let (scheduler, handle, gate, rx) = gated_scheduler();

        scheduler.post_job(handle, 0, 0).unwrap();
        for n in 1..50 {
            scheduler.post_job(handle, n, 0).unwrap();
        }

        // Release the blocking job once the flush is underway
        let release = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(50));
            gate.send(()).ok();
        });

        scheduler.flush_job(handle, false).unwrap();
        release.join().unwrap();

        assert!(scheduler.is_job_available(handle));
        assert!(scheduler.posted_jobs(handle).unwrap().is_empty());

        // Everything that was queued has been either executed or discarded, nothing twice
        let executed: Vec<usize> = rx.try_iter().collect();
        let mut deduplicated = executed.clone();
        deduplicated.dedup();
        assert_eq!(executed, deduplicated);
        assert!(executed.len() <= 50);
    }

    #[test]
    fn discard_later_jobs_after_regular_flush() {
        let (scheduler, handle, rx) = collecting_scheduler("regular-flush");

        scheduler.flush_job(handle, false).unwrap();
        assert_eq!(
            scheduler.flush_status(handle).unwrap(),
            FlushStatus::FlushRequested
        );

        scheduler.post_job(handle, 1, 0).unwrap();
        assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
    }

    #[test]
    fn accept_later_jobs_after_forced_flush() {
        let (scheduler, handle, rx) = collecting_scheduler("forced-flush");

        scheduler.flush_job(handle, true).unwrap();
        assert_eq!(scheduler.flush_status(handle).unwrap(), FlushStatus::NoFlush);

        scheduler.post_job(handle, 1, 0).unwrap();
        assert_eq!(rx.recv_timeout(RECV_TIMEOUT).unwrap(), 1);
    }

    #[test]
    fn remove_queued_jobs_by_payload() {
        let (scheduler, handle, gate, rx) = gated_scheduler();

        scheduler.post_job(handle, 0, 0).unwrap();
        // Give the worker a moment to pick up the blocking job
        std::thread::sleep(Duration::from_millis(50));

        for n in [1, 2, 3, 2] {
            scheduler.post_job(handle, n, 0).unwrap();
        }

        assert_eq!(scheduler.posted_jobs(handle).unwrap(), vec![1, 2, 3, 2]);
        assert_eq!(scheduler.remove_job(handle, &2).unwrap(), 2);
        assert!(!scheduler.is_job_available(handle));

        gate.send(()).unwrap();

        let received: Vec<usize> = (0..3)
            .map(|_| rx.recv_timeout(RECV_TIMEOUT).unwrap())
            .collect();
        assert_eq!(received, vec![0, 1, 3]);
    }

    #[test]
    fn reuse_slot_with_new_generation() {
        let scheduler = JobScheduler::<usize>::with_capacity("single", 1);

        let first = scheduler.register_job_family(|_| {}, "first").unwrap();
        assert!(matches!(
            scheduler.register_job_family(|_| {}, "overflow"),
            Err(SchedulerError::NoFreeSlot { .. })
        ));

        scheduler.unregister_job_family(first).unwrap();
        let second = scheduler.register_job_family(|_| {}, "second").unwrap();

        assert_eq!(first.slot(), second.slot());
        assert_ne!(first.generation(), second.generation());
        assert!(matches!(
            scheduler.post_job(first, 1, 0),
            Err(SchedulerError::UnknownHandle(_))
        ));
        assert!(scheduler.post_job(second, 1, 0).is_ok());
    }

    #[test]
    fn terminate_worker_on_unregister() {
        let (scheduler, handle, rx) = collecting_scheduler("terminate");

        scheduler.post_job(handle, 1, 0).unwrap();
        assert_eq!(rx.recv_timeout(RECV_TIMEOUT).unwrap(), 1);

        scheduler.unregister_job_family(handle).unwrap();

        // The worker owned the only sender, it is gone once the thread has been joined
        assert!(rx.recv_timeout(RECV_TIMEOUT).is_err());
        assert_eq!(scheduler.registered_families(), 0);
        assert!(!scheduler.is_job_available(handle));
        assert!(scheduler.unregister_job_family(handle).is_err());
    }

    #[test]
    fn survive_panicking_jobs() {
        let scheduler = JobScheduler::new("panic");
        let (tx, rx) = channel();
        let tx = Mutex::new(tx);

        let handle = scheduler
            .register_job_family(
                move |n: usize| {
                    if n == 0 {
                        panic!("job failure");
                    }
                    lock(&tx).send(n).unwrap();
                },
                "panicky",
            )
            .unwrap();

        scheduler.post_job(handle, 0, 0).unwrap();
        scheduler.post_job(handle, 1, 0).unwrap();

        assert_eq!(rx.recv_timeout(RECV_TIMEOUT).unwrap(), 1);
    }

    #[test]
    fn reject_flush_from_own_worker() {
        let scheduler = Arc::new(JobScheduler::new("self-flush"));
        let (tx, rx) = channel();
        let tx = Mutex::new(tx);
        let weak = Arc::downgrade(&scheduler);
        let own_handle = Arc::new(Mutex::new(JobHandle::INVALID));
        let captured_handle = own_handle.clone();

        let handle = scheduler
            .register_job_family(
                move |_: usize| {
                    if let Some(scheduler) = weak.upgrade() {
                        let handle = *lock(&captured_handle);
                        let result = scheduler.flush_job(handle, true);
                        lock(&tx)
                            .send(matches!(result, Err(SchedulerError::SelfFlush(_))))
                            .unwrap();
                    }
                },
                "self-flush",
            )
            .unwrap();
        *lock(&own_handle) = handle;

        scheduler.post_job(handle, 0, 0).unwrap();
        assert!(rx.recv_timeout(RECV_TIMEOUT).unwrap());
    }

    #[test]
    fn report_empty_queue_as_available() {
        let (scheduler, handle, gate, _rx) = gated_scheduler();

        assert!(scheduler.is_job_available(handle));
        assert!(!scheduler.is_job_available(JobHandle::INVALID));

        scheduler.post_job(handle, 0, 0).unwrap();
        std::thread::sleep(Duration::from_millis(50));
        scheduler.post_job(handle, 1, 0).unwrap();
        assert!(!scheduler.is_job_available(handle));

        gate.send(()).unwrap();
        scheduler.flush_job(handle, true).unwrap();
        assert!(scheduler.is_job_available(handle));
    }
}
