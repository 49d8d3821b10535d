/// Audit trail for call sessions and money movement
use crate::domain::call_request::{CallRequest, ExpiryKind, StatusChanged};
use crate::domain::ledger::CallPosting;
use crate::domain::shared::value_objects::{AccountId, RequestId};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Audit event severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuditLevel {
    Info,
    Warning,
    /// Money invariant broken; needs a human
    Critical,
}

/// Types of auditable events
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuditEventType {
    RequestCreated {
        request_id: RequestId,
        client_id: AccountId,
        advisor_id: AccountId,
        duration_minutes: u32,
        total_cost: Decimal,
    },
    StatusChanged {
        request_id: RequestId,
        from: Option<String>,
        to: String,
        version: u64,
        forced: bool,
    },
    BillingPosted {
        request_id: RequestId,
        call_id: String,
        amount: Decimal,
    },
    BillingRejected {
        request_id: RequestId,
        reason: String,
    },
    BillingInconsistency {
        request_id: Option<RequestId>,
        account_id: Option<AccountId>,
        detail: String,
    },
    TimerExpired {
        request_id: RequestId,
        kind: String,
    },
    WalletCredited {
        account_id: AccountId,
        amount: Decimal,
        reference: String,
    },
    Custom {
        event_name: String,
        details: HashMap<String, String>,
    },
}

impl AuditEventType {
    fn request_id(&self) -> Option<RequestId> {
        match self {
            AuditEventType::RequestCreated { request_id, .. }
            | AuditEventType::StatusChanged { request_id, .. }
            | AuditEventType::BillingPosted { request_id, .. }
            | AuditEventType::BillingRejected { request_id, .. }
            | AuditEventType::TimerExpired { request_id, .. } => Some(*request_id),
            AuditEventType::BillingInconsistency { request_id, .. } => *request_id,
            AuditEventType::WalletCredited { .. } | AuditEventType::Custom { .. } => None,
        }
    }
}

/// Audit event record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub level: AuditLevel,
    pub event_type: AuditEventType,
    /// Account whose action caused the event; `None` for timers and the sweeper
    pub actor: Option<AccountId>,
    pub metadata: HashMap<String, String>,
}

impl AuditEvent {
    pub fn new(level: AuditLevel, event_type: AuditEventType) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            level,
            event_type,
            actor: None,
            metadata: HashMap::new(),
        }
    }

    pub fn with_actor(mut self, actor: AccountId) -> Self {
        self.actor = Some(actor);
        self
    }

    pub fn with_metadata(mut self, key: String, value: String) -> Self {
        self.metadata.insert(key, value);
        self
    }
}

/// Audit logger backend trait
#[async_trait::async_trait]
pub trait AuditBackend: Send + Sync {
    async fn log(&self, event: &AuditEvent) -> Result<(), String>;
    async fn query(&self, filters: AuditQuery) -> Result<Vec<AuditEvent>, String>;
}

/// Query filters for audit log searches
#[derive(Debug, Clone, Default)]
pub struct AuditQuery {
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub level: Option<AuditLevel>,
    pub request_id: Option<RequestId>,
    pub limit: Option<usize>,
}

impl AuditQuery {
    fn matches(&self, event: &AuditEvent) -> bool {
        if self.start_time.map_or(false, |start| event.timestamp < start) {
            return false;
        }
        if self.end_time.map_or(false, |end| event.timestamp > end) {
            return false;
        }
        if self.level.map_or(false, |level| event.level != level) {
            return false;
        }
        if let Some(request_id) = self.request_id {
            if event.event_type.request_id() != Some(request_id) {
                return false;
            }
        }
        true
    }
}

/// In-memory audit backend keeping the newest `max_events`
pub struct MemoryAuditBackend {
    events: Arc<RwLock<VecDeque<AuditEvent>>>,
    max_events: usize,
}

impl MemoryAuditBackend {
    pub fn new(max_events: usize) -> Self {
        Self {
            events: Arc::new(RwLock::new(VecDeque::new())),
            max_events,
        }
    }
}

#[async_trait::async_trait]
impl AuditBackend for MemoryAuditBackend {
    async fn log(&self, event: &AuditEvent) -> Result<(), String> {
        let mut events = self.events.write().await;
        events.push_back(event.clone());
        while events.len() > self.max_events {
            events.pop_front();
        }
        Ok(())
    }

    async fn query(&self, filters: AuditQuery) -> Result<Vec<AuditEvent>, String> {
        let events = self.events.read().await;
        let limit = filters.limit.unwrap_or(usize::MAX);
        Ok(events
            .iter()
            .filter(|event| filters.matches(event))
            .take(limit)
            .cloned()
            .collect())
    }
}

/// Main audit logger
pub struct AuditLogger {
    backend: Arc<dyn AuditBackend>,
}

impl AuditLogger {
    pub fn new(backend: Arc<dyn AuditBackend>) -> Self {
        Self { backend }
    }

    /// Logger backed by a bounded in-memory store
    pub fn in_memory(max_events: usize) -> Self {
        Self::new(Arc::new(MemoryAuditBackend::new(max_events)))
    }

    /// Log an audit event
    pub async fn log(&self, event: AuditEvent) {
        match event.level {
            AuditLevel::Info => info!("AUDIT: {:?} [{}]", event.event_type, event.id),
            AuditLevel::Warning => warn!("AUDIT: {:?} [{}]", event.event_type, event.id),
            AuditLevel::Critical => error!("CRITICAL AUDIT: {:?} [{}]", event.event_type, event.id),
        }

        if let Err(e) = self.backend.log(&event).await {
            warn!("Failed to log audit event: {}", e);
        }
    }

    /// Query audit logs
    pub async fn query(&self, filters: AuditQuery) -> Result<Vec<AuditEvent>, String> {
        self.backend.query(filters).await
    }

    pub async fn log_request_created(&self, request: &CallRequest) {
        let event = AuditEvent::new(
            AuditLevel::Info,
            AuditEventType::RequestCreated {
                request_id: request.id,
                client_id: request.client_id,
                advisor_id: request.advisor_id,
                duration_minutes: request.duration_minutes,
                total_cost: request.total_cost,
            },
        )
        .with_actor(request.client_id);
        self.log(event).await;
    }

    pub async fn log_transition(&self, change: &StatusChanged, actor: Option<AccountId>) {
        let mut event = AuditEvent::new(
            AuditLevel::Info,
            AuditEventType::StatusChanged {
                request_id: change.request_id,
                from: change.from.map(|s| s.as_str().to_string()),
                to: change.to.as_str().to_string(),
                version: change.version,
                forced: change.forced,
            },
        );
        if let Some(actor) = actor {
            event = event.with_actor(actor);
        }
        self.log(event).await;
    }

    pub async fn log_billing_posted(&self, posting: &CallPosting) {
        let event = AuditEvent::new(
            AuditLevel::Info,
            AuditEventType::BillingPosted {
                request_id: posting.request.id,
                call_id: posting.call.id.to_string(),
                amount: posting.request.total_cost,
            },
        )
        .with_actor(posting.request.client_id);
        self.log(event).await;
    }

    pub async fn log_billing_rejected(&self, request_id: RequestId, reason: String) {
        let event = AuditEvent::new(
            AuditLevel::Warning,
            AuditEventType::BillingRejected { request_id, reason },
        );
        self.log(event).await;
    }

    /// Raise the alarm on a broken money invariant
    pub async fn log_billing_inconsistency(
        &self,
        request_id: Option<RequestId>,
        account_id: Option<AccountId>,
        detail: String,
    ) {
        let event = AuditEvent::new(
            AuditLevel::Critical,
            AuditEventType::BillingInconsistency {
                request_id,
                account_id,
                detail,
            },
        );
        self.log(event).await;
    }

    pub async fn log_timer_expired(&self, request_id: RequestId, kind: ExpiryKind) {
        let event = AuditEvent::new(
            AuditLevel::Info,
            AuditEventType::TimerExpired {
                request_id,
                kind: kind.as_str().to_string(),
            },
        );
        self.log(event).await;
    }

    pub async fn log_wallet_credited(&self, account_id: AccountId, amount: Decimal, reference: String) {
        let event = AuditEvent::new(
            AuditLevel::Info,
            AuditEventType::WalletCredited {
                account_id,
                amount,
                reference,
            },
        )
        .with_actor(account_id);
        self.log(event).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn request() -> CallRequest {
        CallRequest::new(AccountId::new(1), AccountId::new(2), 3, dec!(5), Utc::now())
    }

    #[tokio::test]
    async fn test_request_created_records_actor() {
        let logger = AuditLogger::in_memory(100);
        let request = request();
        logger.log_request_created(&request).await;

        let results = logger.query(AuditQuery::default()).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].actor, Some(AccountId::new(1)));
        assert_eq!(results[0].level, AuditLevel::Info);
    }

    #[tokio::test]
    async fn test_query_by_request_and_level() {
        let logger = AuditLogger::in_memory(100);
        let first = request();
        let second = request();

        logger.log_request_created(&first).await;
        logger.log_request_created(&second).await;
        logger.log_timer_expired(first.id, ExpiryKind::AcceptWindow).await;
        logger
            .log_billing_inconsistency(None, Some(AccountId::new(1)), "drift".to_string())
            .await;

        let for_first = logger
            .query(AuditQuery {
                request_id: Some(first.id),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(for_first.len(), 2);

        let critical = logger
            .query(AuditQuery {
                level: Some(AuditLevel::Critical),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(critical.len(), 1);
    }

    #[tokio::test]
    async fn test_audit_max_events() {
        let logger = AuditLogger::in_memory(2);

        for _ in 0..3 {
            logger.log_request_created(&request()).await;
        }

        let results = logger.query(AuditQuery::default()).await.unwrap();
        assert_eq!(results.len(), 2);
    }
}
