use super::envelope::Action;
use crate::library::communication::transport::TransportError;
use crate::library::communication::MessageError;
use crate::library::scheduling::SchedulerError;
use crate::library::ErrorCode;
use std::time::Duration;
use thiserror::Error;

/// Error type for all operations of the [`Hub`](super::Hub)
#[derive(Error, Debug)]
pub enum HubError {
    /// Options passed to the hub are unusable
    #[error("invalid hub options: {0}")]
    InvalidOptions(String),
    /// Operation is not available in the role the hub was initialized with
    #[error("operation {0} is not supported in this role")]
    Unsupported(&'static str),
    /// The hub is no longer connected to the broker
    #[error("hub is disconnected from the broker")]
    Disconnected,
    /// A service of that name is already registered locally
    #[error("service {0} is already registered")]
    DuplicateService(String),
    /// A method of that name is already registered on the service
    #[error("method {method} is already registered on service {service}")]
    DuplicateMethod {
        /// Name of the service
        service: String,
        /// Name of the duplicate method
        method: String,
    },
    /// The daemon refused to publish the service
    #[error("daemon rejected service {0}")]
    ServiceRejected(String),
    /// No service of that name is known to the daemon
    #[error("service {0} was not found")]
    ServiceNotFound(String),
    /// The service snapshot does not contain the method
    #[error("service {service} has no method {method}")]
    MethodNotFound {
        /// Name of the service
        service: String,
        /// Name of the unknown method
        method: String,
    },
    /// The remote side answered with a failure
    #[error("{action:?} request {mid} to {to} failed")]
    RemoteFailure {
        /// Action of the failed request
        action: Action,
        /// Correlation id of the failed request
        mid: u64,
        /// Recipient of the failed request
        to: String,
    },
    /// No response arrived in time
    #[error("request {mid} timed out after {timeout:?}")]
    Timeout {
        /// Correlation id of the request
        mid: u64,
        /// Time waited for the response
        timeout: Duration,
    },
    /// The pending request was dropped without a response
    #[error("request {0} was cancelled")]
    Cancelled(u64),
    /// Local envelope or payload could not be encoded or decoded
    #[error("malformed payload")]
    Message(#[from] MessageError),
    /// Broker interaction failed
    #[error("transport failure")]
    Transport(#[from] TransportError),
    /// Job families backing the hub could not be managed
    #[error("scheduler failure")]
    Scheduler(#[from] SchedulerError),
}

impl HubError {
    /// Result code classification of the error
    pub fn code(&self) -> ErrorCode {
        match self {
            HubError::InvalidOptions(_) => ErrorCode::InvalidArg,
            HubError::Unsupported(_) => ErrorCode::Unsupported,
            HubError::Disconnected => ErrorCode::InvalidState,
            HubError::Timeout { .. } => ErrorCode::Timeout,
            HubError::Message(e) => e.code(),
            HubError::Transport(e) => e.code(),
            HubError::Scheduler(e) => e.code(),
            _ => ErrorCode::Failed,
        }
    }
}
