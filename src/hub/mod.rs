//! Service publishing, lookup and remote method calls
//!
//! Every participating process constructs one [`Hub`] on top of a shared
//! [`Transport`](crate::library::communication::transport::Transport). Exactly one of them is
//! initialized as the daemon: it holds the directory of published services and pings every
//! client that announced itself, evicting those which stop answering along with their services.
//!
//! All other hubs are clients. They publish their [`LocalService`]s through the daemon, look up
//! [`RemoteService`] snapshots from it and then call methods directly on the owning client.
//! Incoming method calls are executed by a fixed size pool of worker threads.
//!
//! Requests and responses are correlated by a per-client numeric id. Every waiting request is
//! bounded by a timeout after which its correlation entry is dropped, late responses are discarded.
//!
//! The daemon pings clients from plain threads by blocking on the runtime, which requires a
//! multi threaded tokio runtime.

mod correlation;
mod directory;
mod envelope;
mod error;
mod liveness;
mod options;
mod pool;
mod service;

pub use envelope::{
    decode, encode, request_topic, response_topic, Action, Envelope, Reply, Status, UnknownCode,
};
pub use error::HubError;
pub use liveness::{ClientProbe, LivenessOptions, LivenessTracker};
pub use options::*;
pub use service::{LocalService, MethodHandler, RemoteService};

use crate::library::communication::transport::{Delivery, Transport};
use crate::library::communication::Message;
use crate::library::helpers::lock;
use crate::library::BoxedError;
use correlation::CorrelationTable;
use directory::Directory;
use envelope::{
    request_pattern, response_pattern, KEY_INPUT, KEY_METHOD, KEY_METHODS, KEY_OWNER, KEY_SERVICE,
};
use futures::stream::BoxStream;
use futures::StreamExt;
use pool::WorkerPool;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock, Weak};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, trace, warn};

/// Sending side of a hub, shared with everything that issues requests
#[derive(Clone)]
struct Requester {
    client_id: String,
    transport: Arc<dyn Transport>,
    correlation: Arc<CorrelationTable>,
    next_mid: Arc<AtomicU64>,
    connected: Arc<AtomicBool>,
}

impl Requester {
    fn envelope(&self, to: &str, action: Action, data: Message) -> Envelope {
        Envelope {
            mid: self.next_mid.fetch_add(1, Ordering::SeqCst),
            from: self.client_id.clone(),
            to: to.to_owned(),
            action,
            data,
        }
    }

    /// Publishes a request and waits for its response
    #[instrument(level = "debug", skip(self, data, timeout), fields(from = %self.client_id))]
    async fn request(
        &self,
        to: &str,
        action: Action,
        data: Message,
        timeout: Duration,
    ) -> Result<Reply, HubError> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(HubError::Disconnected);
        }

        let envelope = self.envelope(to, action, data);
        let pending = self.correlation.register(envelope.mid);

        self.transport
            .publish(&request_topic(to, envelope.mid), &encode(&envelope)?)
            .await?;

        trace!(mid = pending.mid(), "Awaiting response");

        pending.wait(timeout).await
    }

    /// Publishes a request nobody waits for a response to
    async fn notify(&self, to: &str, action: Action, data: Message) -> Result<(), HubError> {
        let envelope = self.envelope(to, action, data);

        self.transport
            .publish(&request_topic(to, envelope.mid), &encode(&envelope)?)
            .await?;

        Ok(())
    }

    async fn respond(&self, reply: &Reply) -> Result<(), HubError> {
        self.transport
            .publish(&response_topic(&reply.to, reply.mid), &encode(reply)?)
            .await?;

        Ok(())
    }

    fn disconnected(&self, stream: &str) {
        if self.connected.swap(false, Ordering::SeqCst) {
            warn!(client = %self.client_id, stream, "Inbound stream ended, hub is disconnected");
        }
    }
}

/// Reaches clients on behalf of the liveness tracker
struct HubProbe {
    requester: Requester,
    runtime: Handle,
    timeout: Duration,
    hub: Weak<HubInner>,
}

impl ClientProbe for HubProbe {
    fn ping(&self, client_id: &str) -> Result<(), HubError> {
        let reply = self.runtime.block_on(self.requester.request(
            client_id,
            Action::ServerPing,
            Message::new(),
            self.timeout,
        ))?;

        match reply.status {
            Status::Ok => Ok(()),
            Status::Failed => Err(HubError::RemoteFailure {
                action: Action::ServerPing,
                mid: reply.mid,
                to: client_id.to_owned(),
            }),
        }
    }

    fn evicted(&self, client_id: &str) {
        if let Some(hub) = self.hub.upgrade() {
            if let Some(directory) = &hub.directory {
                let purged = directory.purge_owner(client_id);
                info!(client = client_id, ?purged, remaining = directory.len(), "Purged services of evicted client");
            }
        }
    }
}

struct HubInner {
    options: HubOptions,
    requester: Requester,
    services: Mutex<HashMap<String, Arc<LocalService>>>,
    directory: Option<Directory>,
    tracker: OnceLock<LivenessTracker<HubProbe>>,
    pool: OnceLock<WorkerPool>,
    replies: mpsc::UnboundedSender<Reply>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl HubInner {
    fn send_reply(&self, reply: Reply) {
        if self.replies.send(reply).is_err() {
            warn!("Reply publisher has stopped, dropping reply");
        }
    }

    async fn handle_request(&self, delivery: Delivery) {
        let envelope: Envelope = match decode(&delivery.payload) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(topic = %delivery.topic, error = %e, "Dropping malformed request");
                return;
            }
        };

        trace!(mid = envelope.mid, from = %envelope.from, action = ?envelope.action, "Received request");

        match envelope.action {
            Action::ServerPing => self.send_reply(envelope.reply(Status::Ok, None)),
            Action::ClientOnline => self.client_online(&envelope),
            Action::ServiceAdd => {
                let status = self.service_add(&envelope);
                self.send_reply(envelope.reply(status, None));
            }
            Action::ServiceGet => {
                let (status, data) = self.service_get(&envelope);
                self.send_reply(envelope.reply(status, data));
            }
            Action::CallMethod => match self.pool.get() {
                Some(pool) => {
                    let failure = envelope.reply(Status::Failed, None);
                    if let Err(e) = pool.submit(envelope).await {
                        warn!(mid = failure.mid, error = %e, "Unable to dispatch method call");
                        self.send_reply(failure);
                    }
                }
                None => self.send_reply(envelope.reply(Status::Failed, None)),
            },
        }
    }

    fn client_online(&self, envelope: &Envelope) {
        match self.tracker.get() {
            Some(tracker) => match tracker.track(&envelope.from) {
                Ok(true) => {}
                Ok(false) => debug!(client = %envelope.from, "Client is already tracked"),
                Err(e) => warn!(client = %envelope.from, error = %e, "Unable to track client"),
            },
            None => self.send_reply(envelope.reply(Status::Failed, None)),
        }
    }

    fn service_add(&self, envelope: &Envelope) -> Status {
        let directory = match &self.directory {
            Some(directory) => directory,
            None => return Status::Failed,
        };

        let service = envelope.data.get_string(KEY_SERVICE);
        let methods = envelope.data.get_string_array(KEY_METHODS);

        match (service, methods) {
            (Ok(service), Ok(methods)) => {
                if directory.add(&envelope.from, &service, methods) {
                    Status::Ok
                } else {
                    debug!(owner = %envelope.from, %service, "Rejected duplicate service");
                    Status::Failed
                }
            }
            _ => {
                warn!(from = %envelope.from, "Rejected malformed service registration");
                Status::Failed
            }
        }
    }

    fn service_get(&self, envelope: &Envelope) -> (Status, Option<Message>) {
        let found = match (&self.directory, envelope.data.get_string(KEY_SERVICE)) {
            (Some(directory), Ok(name)) => directory.get(&name),
            _ => None,
        };

        match found {
            Some(remote) => {
                let mut data = Message::new();
                data.set_string(KEY_SERVICE, remote.name())
                    .set_string_array(KEY_METHODS, remote.methods())
                    .set_string(KEY_OWNER, remote.owner());

                (Status::Ok, Some(data))
            }
            None => (Status::Failed, None),
        }
    }

    /// Runs a method call on a pool worker thread and queues the reply
    fn execute_call(&self, envelope: Envelope) {
        let reply = match catch_unwind(AssertUnwindSafe(|| self.invoke(&envelope.data))) {
            Ok(Ok(output)) => envelope.reply(Status::Ok, Some(output)),
            Ok(Err(e)) => {
                warn!(mid = envelope.mid, from = %envelope.from, error = %e, "Method call failed");
                envelope.reply(Status::Failed, None)
            }
            Err(_) => {
                error!(mid = envelope.mid, from = %envelope.from, "Method handler panicked");
                envelope.reply(Status::Failed, None)
            }
        };

        self.send_reply(reply);
    }

    fn invoke(&self, data: &Message) -> Result<Message, BoxedError> {
        let service = data.get_string(KEY_SERVICE)?;
        let method = data.get_string(KEY_METHOD)?;
        let input = if data.contains(KEY_INPUT) {
            data.get_message(KEY_INPUT)?
        } else {
            Message::new()
        };

        let local = lock(&self.services).get(&service).cloned();
        let handler = match local {
            Some(local) => local.handler(&method),
            None => return Err(HubError::ServiceNotFound(service).into()),
        };

        match handler {
            Some(handler) => handler(&input),
            None => Err(HubError::MethodNotFound { service, method }.into()),
        }
    }
}

impl Drop for HubInner {
    fn drop(&mut self) {
        for task in lock(&self.tasks).drain(..) {
            task.abort();
        }
    }
}

async fn serve_requests(
    hub: Weak<HubInner>,
    requester: Requester,
    mut requests: BoxStream<'static, Delivery>,
) {
    while let Some(delivery) = requests.next().await {
        match hub.upgrade() {
            Some(hub) => hub.handle_request(delivery).await,
            None => return,
        }
    }

    requester.disconnected("requests");
}

async fn serve_responses(requester: Requester, mut responses: BoxStream<'static, Delivery>) {
    while let Some(delivery) = responses.next().await {
        match decode::<Reply>(&delivery.payload) {
            Ok(reply) => {
                let mid = reply.mid;
                if !requester.correlation.resolve(reply) {
                    debug!(mid, "Dropping response nobody is waiting for");
                }
            }
            Err(e) => warn!(topic = %delivery.topic, error = %e, "Dropping malformed response"),
        }
    }

    requester.disconnected("responses");
}

async fn publish_replies(requester: Requester, mut replies: mpsc::UnboundedReceiver<Reply>) {
    while let Some(reply) = replies.recv().await {
        if let Err(e) = requester.respond(&reply).await {
            warn!(mid = reply.mid, to = %reply.to, error = %e, "Unable to publish reply");
        }
    }
}

/// Per-process endpoint of the service network
///
/// Cloning is cheap and yields another handle to the same hub. Dropping the last handle
/// stops all background tasks and joins the worker threads.
#[derive(Clone)]
pub struct Hub {
    inner: Arc<HubInner>,
}

impl Hub {
    /// Connects the hub and starts serving requests
    ///
    /// Clients announce themselves to the daemon before this returns. Must be called from within
    /// a tokio runtime.
    #[instrument(skip(options, transport), fields(client = %options.client_id, daemon = options.daemon))]
    pub async fn initialize(
        options: HubOptions,
        transport: Arc<dyn Transport>,
    ) -> Result<Self, HubError> {
        options.validate()?;

        let requests = transport
            .subscribe(&request_pattern(&options.client_id))
            .await?;
        let responses = transport
            .subscribe(&response_pattern(&options.client_id))
            .await?;

        let requester = Requester {
            client_id: options.client_id.clone(),
            transport,
            correlation: Arc::new(CorrelationTable::default()),
            next_mid: Arc::new(AtomicU64::new(1)),
            connected: Arc::new(AtomicBool::new(true)),
        };

        let (replies, reply_rx) = mpsc::unbounded_channel();
        let directory = if options.daemon {
            Some(Directory::default())
        } else {
            None
        };

        let inner = Arc::new(HubInner {
            options,
            requester: requester.clone(),
            services: Mutex::new(HashMap::new()),
            directory,
            tracker: OnceLock::new(),
            pool: OnceLock::new(),
            replies,
            tasks: Mutex::new(Vec::new()),
        });

        let runtime = Handle::current();
        let weak = Arc::downgrade(&inner);

        if inner.options.daemon {
            let probe = HubProbe {
                requester: requester.clone(),
                runtime: runtime.clone(),
                timeout: inner.options.ping_timeout,
                hub: weak.clone(),
            };
            let tracker = LivenessTracker::new(
                probe,
                LivenessOptions {
                    interval: inner.options.ping_interval,
                    max_missed: inner.options.max_missed_pings,
                },
            )?;

            inner.tracker.set(tracker).ok();
        } else {
            let hub = weak.clone();
            let pool = WorkerPool::new(inner.options.workers, move |envelope| {
                if let Some(hub) = hub.upgrade() {
                    hub.execute_call(envelope);
                }
            })?;

            inner.pool.set(pool).ok();
        }

        *lock(&inner.tasks) = vec![
            runtime.spawn(serve_requests(weak, requester.clone(), requests)),
            runtime.spawn(serve_responses(requester.clone(), responses)),
            runtime.spawn(publish_replies(requester, reply_rx)),
        ];

        let hub = Self { inner };

        if !hub.is_daemon() {
            hub.inner
                .requester
                .notify(&hub.inner.options.daemon_id, Action::ClientOnline, Message::new())
                .await?;
        }

        info!("Hub initialized");

        Ok(hub)
    }

    /// Identity of this process on the broker
    pub fn client_id(&self) -> &str {
        &self.inner.options.client_id
    }

    /// Whether this hub acts as the daemon
    pub fn is_daemon(&self) -> bool {
        self.inner.options.daemon
    }

    /// Whether both inbound streams are still alive
    pub fn is_connected(&self) -> bool {
        self.inner.requester.connected.load(Ordering::SeqCst)
    }

    /// Ids of the clients the daemon currently watches, empty for regular clients
    pub fn tracked_clients(&self) -> Vec<String> {
        self.inner
            .tracker
            .get()
            .map(LivenessTracker::tracked_clients)
            .unwrap_or_default()
    }

    /// Creates a service owned by this hub, which may then be populated and published
    pub fn create_local_service(&self, name: &str) -> Result<Arc<LocalService>, HubError> {
        if lock(&self.inner.services).contains_key(name) {
            return Err(HubError::DuplicateService(name.to_owned()));
        }

        Ok(Arc::new(LocalService::new(name, self.client_id())))
    }

    /// Publishes the service through the daemon and starts serving it
    #[instrument(skip(self, service, timeout), fields(service = service.name()))]
    pub async fn add_service(
        &self,
        service: &Arc<LocalService>,
        timeout: Duration,
    ) -> Result<(), HubError> {
        if self.is_daemon() {
            return Err(HubError::Unsupported("add_service"));
        }

        let name = service.name().to_owned();
        if lock(&self.inner.services).contains_key(&name) {
            return Err(HubError::DuplicateService(name));
        }

        let mut data = Message::new();
        data.set_string(KEY_SERVICE, &name)
            .set_string_array(KEY_METHODS, &service.method_names());

        let reply = self
            .inner
            .requester
            .request(&self.inner.options.daemon_id, Action::ServiceAdd, data, timeout)
            .await?;

        if reply.status != Status::Ok {
            return Err(HubError::ServiceRejected(name));
        }

        let mut services = lock(&self.inner.services);
        if services.contains_key(&name) {
            return Err(HubError::DuplicateService(name));
        }
        services.insert(name, service.clone());

        debug!("Service published");

        Ok(())
    }

    /// Same as [`add_service`](Self::add_service) with the configured directory timeout
    pub async fn add_service_default(&self, service: &Arc<LocalService>) -> Result<(), HubError> {
        self.add_service(service, self.inner.options.directory_timeout)
            .await
    }

    /// Looks the service up in the daemon's directory
    #[instrument(skip(self, timeout))]
    pub async fn get_service(
        &self,
        name: &str,
        timeout: Duration,
    ) -> Result<Arc<RemoteService>, HubError> {
        if let Some(directory) = &self.inner.directory {
            return directory
                .get(name)
                .map(Arc::new)
                .ok_or_else(|| HubError::ServiceNotFound(name.to_owned()));
        }

        let mut data = Message::new();
        data.set_string(KEY_SERVICE, name);

        let reply = self
            .inner
            .requester
            .request(&self.inner.options.daemon_id, Action::ServiceGet, data, timeout)
            .await?;

        if reply.status != Status::Ok {
            return Err(HubError::ServiceNotFound(name.to_owned()));
        }

        let data = reply.data.unwrap_or_default();
        let methods = data.get_string_array(KEY_METHODS)?;
        let owner = data.get_string(KEY_OWNER)?;

        Ok(Arc::new(RemoteService::new(name, methods, &owner)))
    }

    /// Same as [`get_service`](Self::get_service) with the configured directory timeout
    pub async fn get_service_default(&self, name: &str) -> Result<Arc<RemoteService>, HubError> {
        self.get_service(name, self.inner.options.directory_timeout)
            .await
    }

    /// Calls a method on the client owning the service and returns the handler's output
    ///
    /// The method does not have to be part of the snapshot, the owner decides whether it exists.
    #[instrument(skip(self, remote, request, timeout), fields(service = remote.name(), owner = remote.owner()))]
    pub async fn call_method(
        &self,
        remote: &RemoteService,
        method: &str,
        request: &Message,
        timeout: Duration,
    ) -> Result<Message, HubError> {
        let mut data = Message::new();
        data.set_string(KEY_SERVICE, remote.name())
            .set_string(KEY_METHOD, method)
            .set_message(KEY_INPUT, request);

        let reply = self
            .inner
            .requester
            .request(remote.owner(), Action::CallMethod, data, timeout)
            .await?;

        match reply.status {
            Status::Ok => Ok(reply.data.unwrap_or_default()),
            Status::Failed => Err(HubError::RemoteFailure {
                action: Action::CallMethod,
                mid: reply.mid,
                to: remote.owner().to_owned(),
            }),
        }
    }
}
