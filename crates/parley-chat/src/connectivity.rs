//! Shared connectivity state.
//!
//! `ConnectivityMonitor` is a cloneable handle. Platform online/offline
//! events and remote call outcomes go in; snapshots and a watch stream of
//! changes come out. A remote failure opens a cool-down window during which
//! the remote service is not attempted.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info};

use parley_core::types::ConnectivityState;

#[derive(Debug)]
struct MonitorInner {
    state: ConnectivityState,
    last_failure: Option<Instant>,
}

/// Handle to the process-wide connectivity state.
#[derive(Debug, Clone)]
pub struct ConnectivityMonitor {
    inner: Arc<Mutex<MonitorInner>>,
    tx: Arc<watch::Sender<ConnectivityState>>,
    cooldown: Duration,
}

impl ConnectivityMonitor {
    /// Create a monitor with the given failure cool-down.
    ///
    /// Starts optimistic: online and reachable.
    pub fn new(cooldown: Duration) -> Self {
        let state = ConnectivityState::default();
        let (tx, _rx) = watch::channel(state);
        Self {
            inner: Arc::new(Mutex::new(MonitorInner {
                state,
                last_failure: None,
            })),
            tx: Arc::new(tx),
            cooldown,
        }
    }

    fn lock(&self) -> MutexGuard<'_, MonitorInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Publish `inner.state`. Callers hold the lock so watchers see changes
    /// in the order they were applied.
    fn publish(&self, inner: &MonitorInner) {
        let state = inner.state;
        self.tx.send_if_modified(|current| {
            if *current != state {
                *current = state;
                true
            } else {
                false
            }
        });
    }

    pub fn snapshot(&self) -> ConnectivityState {
        self.lock().state
    }

    /// Receive every state change.
    pub fn subscribe(&self) -> watch::Receiver<ConnectivityState> {
        self.tx.subscribe()
    }

    /// Apply a platform online/offline event.
    pub fn set_network_online(&self, online: bool) {
        let mut inner = self.lock();
        if inner.state.network_online == online {
            return;
        }
        inner.state.network_online = online;
        info!(online, "Network connectivity changed");
        self.publish(&inner);
    }

    /// A remote call or health probe succeeded.
    pub fn record_success(&self) {
        let mut inner = self.lock();
        inner.last_failure = None;
        if inner.state.remote_service_reachable {
            return;
        }
        inner.state.remote_service_reachable = true;
        info!("Remote service reachable again");
        self.publish(&inner);
    }

    /// A remote call or health probe failed. Opens the cool-down window.
    pub fn record_failure(&self) {
        let mut inner = self.lock();
        inner.last_failure = Some(Instant::now());
        if !inner.state.remote_service_reachable {
            return;
        }
        inner.state.remote_service_reachable = false;
        info!(
            cooldown_ms = self.cooldown.as_millis() as u64,
            "Remote service marked unreachable"
        );
        self.publish(&inner);
    }

    /// Whether the last remote failure is inside the cool-down window.
    pub fn in_cooldown(&self) -> bool {
        self.lock()
            .last_failure
            .is_some_and(|at| at.elapsed() < self.cooldown)
    }

    /// Whether the next send should try the remote service.
    pub fn should_attempt_remote(&self) -> bool {
        self.snapshot().network_online && !self.in_cooldown()
    }

    /// Periodically open a TCP connection to `target` (`host:port`) and
    /// report the result as the network online/offline signal.
    pub fn spawn_network_watch(
        &self,
        target: String,
        interval: Duration,
        timeout: Duration,
    ) -> JoinHandle<()> {
        let monitor = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let online = match tokio::time::timeout(timeout, TcpStream::connect(&target)).await
                {
                    Ok(Ok(_)) => true,
                    Ok(Err(e)) => {
                        debug!(target = %target, error = %e, "Network check failed");
                        false
                    }
                    Err(_) => {
                        debug!(target = %target, "Network check timed out");
                        false
                    }
                };
                monitor.set_network_online(online);
            }
        })
    }
}

impl Default for ConnectivityMonitor {
    fn default() -> Self {
        Self::new(Duration::from_millis(5_000))
    }
}
