use super::envelope::Envelope;
use super::error::HubError;
use crate::library::scheduling::{JobHandle, JobScheduler, SchedulerError};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, warn};

pub(crate) struct PoolJob {
    worker: JobHandle,
    envelope: Envelope,
}

/// Puts the worker back into the idle channel once its job is done, even if it panicked
struct IdleToken {
    worker: JobHandle,
    idle: mpsc::Sender<JobHandle>,
}

impl Drop for IdleToken {
    fn drop(&mut self) {
        if self.idle.try_send(self.worker).is_err() {
            warn!(worker = %self.worker, "Unable to return worker to the pool");
        }
    }
}

/// Fixed number of job families executing method calls
///
/// Idle workers are represented by their handle waiting in a channel. Submitting takes a handle
/// out of the channel (waiting if every worker is busy) and the worker puts it back once done,
/// so no more than `size` calls execute at the same time.
pub(crate) struct WorkerPool {
    scheduler: JobScheduler<PoolJob>,
    idle_tx: mpsc::Sender<JobHandle>,
    idle_rx: Mutex<mpsc::Receiver<JobHandle>>,
}

impl WorkerPool {
    pub fn new<F>(size: usize, dispatch: F) -> Result<Self, SchedulerError>
    where
        F: Fn(Envelope) + Send + Sync + 'static,
    {
        let dispatch = Arc::new(dispatch);
        let scheduler = JobScheduler::with_capacity("hub-worker", size);
        let (idle_tx, idle_rx) = mpsc::channel(size.max(1));

        for index in 0..size {
            let dispatch = dispatch.clone();
            let idle = idle_tx.clone();

            let handle = scheduler.register_job_family(
                move |job: PoolJob| {
                    let _token = IdleToken {
                        worker: job.worker,
                        idle: idle.clone(),
                    };

                    dispatch(job.envelope);
                },
                &format!("worker-{}", index),
            )?;

            idle_tx.try_send(handle).ok();
        }

        debug!(size, "Provisioned worker pool");

        Ok(Self {
            scheduler,
            idle_tx,
            idle_rx: Mutex::new(idle_rx),
        })
    }

    /// Hands the envelope to the next idle worker, waiting for one to become available
    pub async fn submit(&self, envelope: Envelope) -> Result<(), HubError> {
        let worker = self
            .idle_rx
            .lock()
            .await
            .recv()
            .await
            .ok_or(HubError::Disconnected)?;

        let mid = envelope.mid;
        if let Err(e) = self
            .scheduler
            .post_job(worker, PoolJob { worker, envelope }, mid)
        {
            self.idle_tx.try_send(worker).ok();
            return Err(e.into());
        }

        Ok(())
    }
}

#[cfg(test)]
mod does {
    use super::*;
    use crate::hub::envelope::Action;
    use crate::library::communication::Message;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn envelope(mid: u64) -> Envelope {
        Envelope {
            mid,
            from: "a".into(),
            to: "b".into(),
            action: Action::CallMethod,
            data: Message::new(),
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn bound_concurrent_executions() {
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let (done_tx, mut done_rx) = mpsc::unbounded_channel();

        let pool = {
            let running = running.clone();
            let peak = peak.clone();
            WorkerPool::new(2, move |envelope| {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                std::thread::sleep(Duration::from_millis(20));
                running.fetch_sub(1, Ordering::SeqCst);
                done_tx.send(envelope.mid).unwrap();
            })
            .unwrap()
        };

        for mid in 0..8 {
            pool.submit(envelope(mid)).await.unwrap();
        }

        let mut finished = Vec::new();
        for _ in 0..8 {
            finished.push(done_rx.recv().await.unwrap());
        }
        finished.sort_unstable();

        assert_eq!(finished, (0..8).collect::<Vec<_>>());
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn recover_workers_from_panicking_jobs() {
        let (done_tx, mut done_rx) = mpsc::unbounded_channel();

        let pool = WorkerPool::new(1, move |envelope| {
            if envelope.mid < 3 {
                panic!("job {} exploded", envelope.mid);
            }
            done_tx.send(envelope.mid).unwrap();
        })
        .unwrap();

        for mid in 0..4 {
            tokio::time::timeout(Duration::from_secs(5), pool.submit(envelope(mid)))
                .await
                .expect("worker was not returned to the pool")
                .unwrap();
        }

        let finished = tokio::time::timeout(Duration::from_secs(5), done_rx.recv())
            .await
            .unwrap();
        assert_eq!(finished, Some(3));
    }
}
