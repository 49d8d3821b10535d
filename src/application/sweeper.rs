//! Server-side expiry sweep

use crate::application::session_facade::SessionFacade;
use crate::application::timers::Expiry;
use crate::config::SessionConfig;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use metrics::gauge;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Periodically expires open requests whose countdown should already have
/// fired. Covers timers lost to a restart or a dead party session.
pub struct ExpirySweeper {
    facade: Arc<SessionFacade>,
    accept_window: ChronoDuration,
    join_window: ChronoDuration,
    grace: ChronoDuration,
    interval: Duration,
}

impl ExpirySweeper {
    pub fn new(facade: Arc<SessionFacade>, session: &SessionConfig) -> Self {
        Self {
            facade,
            accept_window: ChronoDuration::seconds(session.accept_timeout_secs as i64),
            join_window: ChronoDuration::seconds(session.join_timeout_secs as i64),
            grace: ChronoDuration::seconds(session.sweep_grace_secs as i64),
            interval: session.sweep_interval(),
        }
    }

    /// One pass over open requests; returns how many were forced
    pub async fn run_once(&self, now: DateTime<Utc>) -> usize {
        let open = match self.facade.open_requests().await {
            Ok(open) => open,
            Err(e) => {
                warn!("Expiry sweep could not list open requests: {}", e);
                return 0;
            }
        };

        gauge!("open_call_requests").set(open.len() as f64);

        let mut forced = 0;
        for request in open {
            let Some((kind, deadline)) = request.deadline(self.accept_window, self.join_window)
            else {
                continue;
            };
            if now < deadline + self.grace {
                continue;
            }

            debug!(
                "Sweeping request {}: {} deadline {} passed",
                request.id, kind, deadline
            );
            let expiry = Expiry {
                request_id: request.id,
                kind,
            };
            if self.facade.expire(expiry).await.is_some() {
                forced += 1;
            }
        }

        if forced > 0 {
            info!("Expiry sweep forced {} request(s)", forced);
        }
        forced
    }

    /// Sweep forever at the configured interval
    pub async fn run(self) {
        info!("Expiry sweeper started (every {:?})", self.interval);
        let mut ticker = tokio::time::interval(self.interval);
        loop {
            ticker.tick().await;
            self.run_once(Utc::now()).await;
        }
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }
}
