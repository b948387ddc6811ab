//! Built-in components shipped with the scheduler itself

pub mod stale_report;
pub mod status_api;

pub use stale_report::{StaleHeartbeatReport, STALE_REPORT_ID, STALE_REPORT_INTERVAL};
pub use status_api::{create_router, ComponentStatus, StatusApiService, StatusState, STATUS_API_ID};
