//! HTTP handlers for the payment API
//!
//! [`routes`] carries the business routes (invoice creation, webhook,
//! status poll) and the router constructor; [`status`] carries the
//! liveness/status probes and the runtime stats they report.

pub mod routes;
pub mod status;

pub use routes::{api_router, AppState};
pub use status::{HealthResponse, LatencyHistogram, RuntimeStats, StatusResponse};
