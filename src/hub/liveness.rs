//! Daemon side watchdogs over every announced client
//!
//! Each tracked client gets its own job family whose single long running job pings the client
//! periodically. After too many consecutive failures the watchdog flags the client and hands it
//! to the removal family, which forgets the client, tears the watchdog down and reports the
//! eviction to the [`ClientProbe`]. Evicted clients have to announce themselves again.

use super::error::HubError;
use crate::library::helpers::lock;
use crate::library::scheduling::{JobHandle, JobScheduler};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, OnceLock, PoisonError, Weak};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Maximum number of clients tracked at the same time
const MAX_TRACKED_CLIENTS: usize = 1024;

/// Means of reaching tracked clients
pub trait ClientProbe: Send + Sync + 'static {
    /// Pings the client, blocking until it answers or the ping times out
    fn ping(&self, client_id: &str) -> Result<(), HubError>;

    /// Called once a client has been evicted
    fn evicted(&self, client_id: &str);
}

/// Timing of the watchdogs
#[derive(Debug, Clone, Copy)]
pub struct LivenessOptions {
    /// Pause before each ping
    pub interval: Duration,
    /// Consecutive failed pings after which a client is evicted
    pub max_missed: u32,
}

/// Interruptible sleep shared by all watchdogs of a tracker
#[derive(Default)]
struct ExitSignal {
    exited: Mutex<bool>,
    condvar: Condvar,
}

impl ExitSignal {
    /// Sleeps for the duration, returning true if the tracker shut down in the meantime
    fn sleep(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        let mut exited = lock(&self.exited);

        while !*exited {
            let now = Instant::now();
            if now >= deadline {
                break;
            }

            exited = self
                .condvar
                .wait_timeout(exited, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }

        *exited
    }

    fn trigger(&self) {
        *lock(&self.exited) = true;
        self.condvar.notify_all();
    }
}

struct TrackedClient {
    watchdog: JobHandle,
    alive: Arc<AtomicBool>,
}

/// Client watched by one particular watchdog family
struct Watch {
    client_id: String,
    watchdog: JobHandle,
}

struct TrackerInner<P> {
    probe: P,
    options: LivenessOptions,
    exit: Arc<ExitSignal>,
    clients: Mutex<HashMap<String, TrackedClient>>,
    watchdogs: JobScheduler<Watch>,
    removals: JobScheduler<Watch>,
    removal_family: OnceLock<JobHandle>,
}

impl<P: ClientProbe> TrackerInner<P> {
    fn watch(
        weak: &Weak<Self>,
        exit: &ExitSignal,
        alive: &AtomicBool,
        options: LivenessOptions,
        watch: Watch,
    ) {
        let mut missed = 0;

        while !exit.sleep(options.interval) && alive.load(Ordering::SeqCst) {
            let tracker = match weak.upgrade() {
                Some(tracker) => tracker,
                None => return,
            };

            match tracker.probe.ping(&watch.client_id) {
                Ok(()) => missed = 0,
                Err(e) => {
                    missed += 1;
                    warn!(client = %watch.client_id, missed, error = %e, "Client missed a ping");
                }
            }

            if missed >= options.max_missed {
                alive.store(false, Ordering::SeqCst);
                tracker.schedule_removal(watch);
                return;
            }
        }
    }

    fn schedule_removal(&self, watch: Watch) {
        let family = match self.removal_family.get() {
            Some(family) => *family,
            None => return,
        };

        info!(client = %watch.client_id, "Evicting unresponsive client");

        if let Err(e) = self.removals.post_job(family, watch, 0) {
            error!(error = %e, "Unable to schedule client removal");
        }
    }

    fn remove(&self, watch: Watch) {
        let current = {
            let mut clients = lock(&self.clients);
            let current = clients
                .get(&watch.client_id)
                .map_or(false, |tracked| tracked.watchdog == watch.watchdog);

            // A client that announced itself again keeps its new entry
            if current {
                clients.remove(&watch.client_id);
            }

            current
        };

        if let Err(e) = self.watchdogs.unregister_job_family(watch.watchdog) {
            debug!(client = %watch.client_id, error = %e, "Watchdog already stopped");
            if !current {
                return;
            }
        }

        self.probe.evicted(&watch.client_id);
        debug!(client = %watch.client_id, retracked = !current, "Removed client");
    }
}

/// Pings every tracked client and evicts those that stop answering
pub struct LivenessTracker<P: ClientProbe> {
    inner: Arc<TrackerInner<P>>,
}

impl<P: ClientProbe> LivenessTracker<P> {
    /// Creates a tracker and its removal family
    pub fn new(probe: P, options: LivenessOptions) -> Result<Self, HubError> {
        let inner = Arc::new(TrackerInner {
            probe,
            options,
            exit: Arc::new(ExitSignal::default()),
            clients: Mutex::new(HashMap::new()),
            watchdogs: JobScheduler::with_capacity("watchdog", MAX_TRACKED_CLIENTS),
            removals: JobScheduler::with_capacity("eviction", 1),
            removal_family: OnceLock::new(),
        });

        let weak = Arc::downgrade(&inner);
        let family = inner.removals.register_job_family(
            move |watch: Watch| {
                if let Some(tracker) = weak.upgrade() {
                    tracker.remove(watch);
                }
            },
            "removal",
        )?;
        inner.removal_family.set(family).ok();

        Ok(Self { inner })
    }

    /// Starts watching a client, returning false if it is already being watched
    ///
    /// A client whose watchdog has already given up on it is watched afresh, the pending
    /// eviction only tears down the old watchdog.
    pub fn track(&self, client_id: &str) -> Result<bool, HubError> {
        let mut clients = lock(&self.inner.clients);

        if let Some(tracked) = clients.get(client_id) {
            if tracked.alive.load(Ordering::SeqCst) {
                return Ok(false);
            }

            debug!(client = client_id, "Client announced itself while being evicted");
        }

        let alive = Arc::new(AtomicBool::new(true));
        let watchdog = {
            let weak = Arc::downgrade(&self.inner);
            let exit = self.inner.exit.clone();
            let alive = alive.clone();
            let options = self.inner.options;

            self.inner.watchdogs.register_job_family(
                move |watch: Watch| TrackerInner::watch(&weak, &exit, &alive, options, watch),
                client_id,
            )?
        };

        clients.insert(client_id.to_owned(), TrackedClient { watchdog, alive });
        drop(clients);

        let watch = Watch {
            client_id: client_id.to_owned(),
            watchdog,
        };
        self.inner.watchdogs.post_job(watchdog, watch, 0)?;

        info!(client = client_id, "Tracking client");

        Ok(true)
    }

    /// Whether the client is tracked and has not been flagged as dead
    pub fn is_alive(&self, client_id: &str) -> bool {
        lock(&self.inner.clients)
            .get(client_id)
            .map(|c| c.alive.load(Ordering::SeqCst))
            .unwrap_or(false)
    }

    /// Ids of all tracked clients in lexical order
    pub fn tracked_clients(&self) -> Vec<String> {
        let mut ids: Vec<String> = lock(&self.inner.clients).keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Stops every watchdog and the removal family
    ///
    /// Blocks until all watchdogs have returned, which may take as long as a running ping.
    pub fn shutdown(&self) {
        self.inner.exit.trigger();

        let clients: Vec<(String, TrackedClient)> = lock(&self.inner.clients).drain().collect();
        for (client_id, tracked) in clients {
            if let Err(e) = self.inner.watchdogs.unregister_job_family(tracked.watchdog) {
                warn!(client = %client_id, error = %e, "Unable to stop watchdog");
            }
        }

        if let Some(family) = self.inner.removal_family.get() {
            self.inner.removals.unregister_job_family(*family).ok();
        }
    }
}

impl<P: ClientProbe> Drop for LivenessTracker<P> {
    fn drop(&mut self) {
        self.shutdown();
    }
}
