//! Match sessions: the per-session state machine and the manager that
//! keeps player status in step with it

pub mod manager;
pub mod state;

pub use manager::{AbortOutcome, SessionCounts, SessionManager};
pub use state::{
    ClaimOutcome, ConfirmOutcome, PendingSubstitution, ResultClaim, Session, SubstitutionEvent,
};
