//! Observability: health endpoints and readiness state.

pub mod health;

pub use health::{health_router, HealthState};
