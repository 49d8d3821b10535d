//! Service wiring shared by the binary and the integration tests

use crate::application::{
    Expiry, ExpirySweeper, NotificationDispatcher, SessionFacade, SessionRegistry,
    TimerSupervisor,
};
use crate::config::Config;
use crate::domain::account::AccountRepository;
use crate::domain::call_request::CallRequestRepository;
use crate::domain::ledger::{Ledger, LedgerRepository};
use crate::infrastructure::audit::AuditLogger;
use crate::infrastructure::media::LocalMediaProvider;
use crate::infrastructure::realtime::BroadcastTransport;
use crate::infrastructure::signaling::HmacTokenIssuer;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

const AUDIT_CAPACITY: usize = 10_000;

/// Everything a running node needs, built over one store
pub struct SessionServices {
    pub facade: Arc<SessionFacade>,
    pub ledger: Arc<Ledger>,
    pub transport: Arc<BroadcastTransport>,
    pub signaling: Arc<HmacTokenIssuer>,
    pub media: Arc<LocalMediaProvider>,
    pub audit: Arc<AuditLogger>,
    expiries: Option<mpsc::UnboundedReceiver<Expiry>>,
}

impl SessionServices {
    /// Wire the session core over `store`, which backs every repository port
    pub fn build<S>(config: &Config, store: Arc<S>) -> Self
    where
        S: AccountRepository + CallRequestRepository + LedgerRepository + 'static,
    {
        let accounts: Arc<dyn AccountRepository> = store.clone();
        let requests: Arc<dyn CallRequestRepository> = store.clone();
        let entries: Arc<dyn LedgerRepository> = store;

        let signaling = Arc::new(HmacTokenIssuer::from_config(&config.signaling));
        let media = Arc::new(LocalMediaProvider::new(signaling.clone()));
        let transport = Arc::new(BroadcastTransport::new(config.dispatcher.channel_capacity));
        let audit = Arc::new(AuditLogger::in_memory(AUDIT_CAPACITY));

        let ledger = Arc::new(Ledger::new(entries, accounts.clone()));
        let registry = SessionRegistry::new(
            accounts.clone(),
            requests,
            ledger.clone(),
            signaling.clone(),
            &config.session,
        );
        let dispatcher = Arc::new(NotificationDispatcher::new(transport.clone()));
        let (timers, expiries) = TimerSupervisor::new();

        let facade = Arc::new(SessionFacade::new(
            registry,
            ledger.clone(),
            accounts,
            dispatcher,
            timers,
            audit.clone(),
            &config.session,
        ));

        Self {
            facade,
            ledger,
            transport,
            signaling,
            media,
            audit,
            expiries: Some(expiries),
        }
    }

    /// Start draining fired timers into the facade. Only the first call
    /// spawns a worker.
    pub fn start_expiry_worker(&mut self) -> Option<JoinHandle<()>> {
        let expiries = self.expiries.take()?;
        Some(self.facade.clone().spawn_expiry_worker(expiries))
    }

    pub fn sweeper(&self, config: &Config) -> ExpirySweeper {
        ExpirySweeper::new(self.facade.clone(), &config.session)
    }
}
