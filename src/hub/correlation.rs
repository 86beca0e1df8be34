use super::envelope::Reply;
use super::error::HubError;
use crate::library::helpers::lock;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::trace;

/// Requests that are waiting for their response, keyed by correlation id
#[derive(Default)]
pub(crate) struct CorrelationTable {
    pending: Mutex<HashMap<u64, oneshot::Sender<Reply>>>,
}

impl CorrelationTable {
    /// Creates the slot for a response. The slot disappears once the returned value is dropped.
    pub fn register(self: &Arc<Self>, mid: u64) -> PendingReply {
        let (tx, rx) = oneshot::channel();
        lock(&self.pending).insert(mid, tx);

        PendingReply {
            mid,
            rx,
            table: self.clone(),
        }
    }

    /// Hands a response to its waiter, returning false if nobody is waiting for it
    pub fn resolve(&self, reply: Reply) -> bool {
        let waiter = lock(&self.pending).remove(&reply.mid);

        match waiter {
            Some(tx) => tx.send(reply).is_ok(),
            None => false,
        }
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        lock(&self.pending).len()
    }
}

/// Receiving end of a registered correlation slot
pub(crate) struct PendingReply {
    mid: u64,
    rx: oneshot::Receiver<Reply>,
    table: Arc<CorrelationTable>,
}

impl PendingReply {
    pub fn mid(&self) -> u64 {
        self.mid
    }

    /// Waits for the response, giving up after the timeout
    pub async fn wait(mut self, timeout: Duration) -> Result<Reply, HubError> {
        match tokio::time::timeout(timeout, &mut self.rx).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(_)) => Err(HubError::Cancelled(self.mid)),
            Err(_) => Err(HubError::Timeout {
                mid: self.mid,
                timeout,
            }),
        }
    }
}

impl Drop for PendingReply {
    fn drop(&mut self) {
        if lock(&self.table.pending).remove(&self.mid).is_some() {
            trace!(mid = self.mid, "Abandoned pending request");
        }
    }
}

#[cfg(test)]
mod does {
    use super::*;
    use crate::hub::envelope::Status;
    use pretty_assertions::assert_eq;

    fn reply(mid: u64) -> Reply {
        Reply {
            status: Status::Ok,
            mid,
            from: "b".into(),
            to: "a".into(),
            data: None,
        }
    }

    #[tokio::test]
    async fn hand_responses_to_their_waiter() {
        let table = Arc::new(CorrelationTable::default());
        let first = table.register(1);
        let second = table.register(2);

        assert!(table.resolve(reply(2)));
        assert!(table.resolve(reply(1)));

        assert_eq!(second.wait(Duration::from_secs(1)).await.unwrap().mid, 2);
        assert_eq!(first.wait(Duration::from_secs(1)).await.unwrap().mid, 1);
        assert_eq!(table.len(), 0);
    }

    #[tokio::test]
    async fn drop_entry_on_timeout() {
        let table = Arc::new(CorrelationTable::default());
        let pending = table.register(7);

        let result = pending.wait(Duration::from_millis(20)).await;

        assert!(matches!(result, Err(HubError::Timeout { mid: 7, .. })));
        assert_eq!(table.len(), 0);
        assert!(!table.resolve(reply(7)));
    }

    #[test]
    fn ignore_unmatched_responses() {
        let table = Arc::new(CorrelationTable::default());
        let pending = table.register(1);

        assert!(!table.resolve(reply(2)));
        assert_eq!(table.len(), 1);

        drop(pending);
        assert_eq!(table.len(), 0);
    }
}
