//! REST and WebSocket API

pub mod call_request_handler;
pub mod dto;
pub mod ledger_handler;
pub mod metrics_handler;
pub mod router;
pub mod ws_handler;

pub use call_request_handler::{AppState, Caller, CALLER_HEADER};
pub use dto::{ApiError, ApiResponse, CallRequestView};
pub use metrics_handler::init_metrics;
pub use router::build_router;
