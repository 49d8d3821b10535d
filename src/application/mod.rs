//! Application layer - Use cases and application services
//!
//! This layer orchestrates domain objects to fulfill use cases.
//! It's responsible for:
//! - Running the call request state machine against the stores
//! - Coordinating billing with the in_progress transition
//! - Publishing state changes to both parties
//! - Supervising the countdowns that force transitions

pub mod dispatcher;
pub mod party_session;
pub mod registry;
pub mod session_facade;
pub mod sweeper;
pub mod timers;

pub use dispatcher::{FeedSubscription, NotificationDispatcher};
pub use party_session::PartySession;
pub use registry::{EndOutcome, JoinOutcome, SessionRegistry, Transition};
pub use session_facade::{AdvisorAction, ClientAction, SessionFacade};
pub use sweeper::ExpirySweeper;
pub use timers::{Expiry, TimerSupervisor};
