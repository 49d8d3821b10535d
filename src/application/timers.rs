//! Timer supervisor - per-request countdowns that force transitions

use crate::domain::call_request::ExpiryKind;
use crate::domain::shared::value_objects::RequestId;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::debug;

/// A countdown that ran out
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Expiry {
    pub request_id: RequestId,
    pub kind: ExpiryKind,
}

struct Armed {
    generation: u64,
    handle: JoinHandle<()>,
}

type TimerKey = (RequestId, ExpiryKind);

/// Runs the accept, join and duration countdowns.
///
/// Fired timers are reported on the channel returned by [`TimerSupervisor::new`];
/// the receiver decides what to force. A fire that arrives after the request
/// has moved on is harmless because the forced transition re-checks status.
pub struct TimerSupervisor {
    armed: Arc<Mutex<HashMap<TimerKey, Armed>>>,
    fired: mpsc::UnboundedSender<Expiry>,
    generation: AtomicU64,
}

impl TimerSupervisor {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Expiry>) {
        let (fired, rx) = mpsc::unbounded_channel();
        (
            Self {
                armed: Arc::new(Mutex::new(HashMap::new())),
                fired,
                generation: AtomicU64::new(0),
            },
            rx,
        )
    }

    /// Start (or restart) the `kind` countdown for a request
    pub async fn arm(&self, request_id: RequestId, kind: ExpiryKind, after: Duration) {
        let key = (request_id, kind);
        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        let armed = self.armed.clone();
        let fired = self.fired.clone();

        // Hold the table while spawning so the task cannot remove its entry
        // before it has been inserted.
        let mut table = self.armed.lock().await;
        let handle = tokio::spawn(async move {
            tokio::time::sleep(after).await;

            {
                let mut table = armed.lock().await;
                if table.get(&key).map(|a| a.generation) == Some(generation) {
                    table.remove(&key);
                }
            }

            debug!("Timer {} fired for request {}", kind, request_id);
            if fired.send(Expiry { request_id, kind }).is_err() {
                debug!("No expiry receiver for request {}", request_id);
            }
        });

        if let Some(previous) = table.insert(key, Armed { generation, handle }) {
            previous.handle.abort();
        }
        debug!("Armed {} timer for request {} ({:?})", kind, request_id, after);
    }

    /// Cancel one countdown; returns whether it was still armed
    pub async fn cancel(&self, request_id: RequestId, kind: ExpiryKind) -> bool {
        match self.armed.lock().await.remove(&(request_id, kind)) {
            Some(armed) => {
                armed.handle.abort();
                debug!("Cancelled {} timer for request {}", kind, request_id);
                true
            }
            None => false,
        }
    }

    /// Cancel every countdown of a request
    pub async fn cancel_all(&self, request_id: RequestId) -> usize {
        let mut table = self.armed.lock().await;
        let keys: Vec<TimerKey> = table
            .keys()
            .filter(|(id, _)| *id == request_id)
            .copied()
            .collect();

        for key in &keys {
            if let Some(armed) = table.remove(key) {
                armed.handle.abort();
            }
        }
        keys.len()
    }

    pub async fn is_armed(&self, request_id: RequestId, kind: ExpiryKind) -> bool {
        self.armed.lock().await.contains_key(&(request_id, kind))
    }

    pub async fn active_count(&self) -> usize {
        self.armed.lock().await.len()
    }
}

impl Drop for TimerSupervisor {
    fn drop(&mut self) {
        if let Ok(table) = self.armed.try_lock() {
            for armed in table.values() {
                armed.handle.abort();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_timer_fires_after_window() {
        let (timers, mut rx) = TimerSupervisor::new();
        let id = RequestId::new();

        timers.arm(id, ExpiryKind::AcceptWindow, Duration::from_secs(20)).await;
        assert!(timers.is_armed(id, ExpiryKind::AcceptWindow).await);

        tokio::time::advance(Duration::from_secs(19)).await;
        assert!(rx.try_recv().is_err());

        let expiry = rx.recv().await.unwrap();
        assert_eq!(
            expiry,
            Expiry {
                request_id: id,
                kind: ExpiryKind::AcceptWindow
            }
        );
        assert_eq!(timers.active_count().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_timer_never_fires() {
        let (timers, mut rx) = TimerSupervisor::new();
        let id = RequestId::new();

        timers.arm(id, ExpiryKind::JoinWindow, Duration::from_secs(15)).await;
        assert!(timers.cancel(id, ExpiryKind::JoinWindow).await);
        assert!(!timers.cancel(id, ExpiryKind::JoinWindow).await);

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_rearm_replaces_previous_countdown() {
        let (timers, mut rx) = TimerSupervisor::new();
        let id = RequestId::new();

        timers.arm(id, ExpiryKind::CallDuration, Duration::from_secs(10)).await;
        timers.arm(id, ExpiryKind::CallDuration, Duration::from_secs(30)).await;
        assert_eq!(timers.active_count().await, 1);

        tokio::time::sleep(Duration::from_secs(15)).await;
        assert!(rx.try_recv().is_err());

        tokio::time::sleep(Duration::from_secs(20)).await;
        assert_eq!(rx.try_recv().unwrap().kind, ExpiryKind::CallDuration);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_all_only_touches_one_request() {
        let (timers, _rx) = TimerSupervisor::new();
        let a = RequestId::new();
        let b = RequestId::new();

        timers.arm(a, ExpiryKind::AcceptWindow, Duration::from_secs(20)).await;
        timers.arm(a, ExpiryKind::JoinWindow, Duration::from_secs(15)).await;
        timers.arm(b, ExpiryKind::AcceptWindow, Duration::from_secs(20)).await;

        assert_eq!(timers.cancel_all(a).await, 2);
        assert_eq!(timers.active_count().await, 1);
        assert!(timers.is_armed(b, ExpiryKind::AcceptWindow).await);
    }
}
