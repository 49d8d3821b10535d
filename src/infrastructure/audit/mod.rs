/// Audit trail for session transitions and billing
pub mod logger;

pub use logger::{AuditBackend, AuditEvent, AuditEventType, AuditLevel, AuditLogger, AuditQuery, MemoryAuditBackend};
