//! Service layer for the draft-room matchmaking service
//!
//! Application state, scheduled tasks and health checks for the running
//! service.

pub mod app;
pub mod health;

pub use app::{AppState, ServiceError};
pub use health::{ComponentCheck, HealthCheck, HealthStatus, ServiceProbe};
