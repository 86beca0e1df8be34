use futures::{
    channel::mpsc::{channel, Receiver, Sender},
    future::pending,
    pin_mut, select, FutureExt, SinkExt, StreamExt,
};
use std::fmt;
use tokio::signal::{
    ctrl_c,
    unix::{signal, SignalKind},
};
use tracing::{debug, error, warn};

/// Reason why the heart stopped beating
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeathReason {
    /// Internal kill signal has been sent
    Killed(String),
    /// SIGINT, SIGTERM or other process-external cause
    Terminated,
}

impl fmt::Display for DeathReason {
    fn fmt(&self, w: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeathReason::Killed(reason) => write!(w, "Killed ({})", reason),
            DeathReason::Terminated => write!(w, "Terminated due to external signal"),
        }
    }
}

/// Keeps an executable alive until it is killed internally or terminated by a signal
pub struct Heart {
    rx: Receiver<String>,
}

impl Heart {
    /// Creates a new heart and the linked stone that can kill it
    pub fn new() -> (Self, HeartStone) {
        let (tx, rx) = channel(2);
        (Self { rx }, HeartStone { remote: tx })
    }

    /// Future that waits until the heart dies for the returned reason
    pub async fn death(&mut self) -> DeathReason {
        debug!("Heart starts beating");

        let termination = Heart::termination_signal().fuse();
        pin_mut!(termination);

        loop {
            select! {
                reason = self.rx.next() => match reason {
                    Some(reason) => return DeathReason::Killed(reason),
                    // Every stone is gone, the terminated receiver is skipped from now on
                    None => continue,
                },
                () = termination => return DeathReason::Terminated,
            }
        }
    }

    async fn termination_signal() {
        let sigterm = async {
            match signal(SignalKind::terminate()) {
                Ok(mut stream) => {
                    stream.recv().await;
                }
                Err(e) => {
                    warn!(error = %e, "Unable to listen for SIGTERM");
                    pending::<()>().await;
                }
            }
        }
        .fuse();
        let interrupt = async {
            if let Err(e) = ctrl_c().await {
                warn!(error = %e, "Unable to listen for SIGINT");
                pending::<()>().await;
            }
        }
        .fuse();

        pin_mut!(sigterm, interrupt);

        select! {
            _ = sigterm => {},
            _ = interrupt => {},
        };
    }
}

/// Remote controller for the heart
#[derive(Clone)]
pub struct HeartStone {
    remote: Sender<String>,
}

impl HeartStone {
    /// Kill the associated heart
    pub async fn kill(&mut self, reason: String) {
        if let Err(e) = self.remote.send(reason).await {
            error!(error = %e, "Failed to interact with Heart");
        }
    }
}

#[cfg(test)]
mod does {
    use super::*;
    use futures::poll;
    use std::time::Duration;
    use tokio::task::{spawn, yield_now};
    use tokio::time::sleep;

    #[tokio::test]
    async fn live_until_killed() {
        let (mut heart, _stone) = Heart::new();

        let handle = spawn(async move { heart.death().await });
        sleep(Duration::from_millis(100)).await;
        yield_now().await;

        assert!(!poll!(handle).is_ready());
    }

    #[tokio::test]
    async fn die_when_killed() {
        let (mut heart, mut stone) = Heart::new();

        let handle = spawn(async move { heart.death().await });
        stone.kill("Testing".to_owned()).await;

        assert_eq!(
            handle.await.unwrap(),
            DeathReason::Killed("Testing".to_owned())
        );
    }

    #[tokio::test]
    async fn outlive_dropped_stones() {
        let (mut heart, stone) = Heart::new();
        drop(stone);

        let handle = spawn(async move { heart.death().await });
        sleep(Duration::from_millis(50)).await;
        yield_now().await;

        assert!(!poll!(handle).is_ready());
    }
}
