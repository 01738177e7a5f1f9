//! HTTP request handlers for the live service.

pub mod health;
pub mod metrics;
pub mod sessions;

pub use health::{health_check, readiness_check};
pub use metrics::metrics_handler;
pub use sessions::{
    create_session, end_session, get_session, issue_invite, join_by_invite, join_session,
    leave_session, list_hosted_sessions, list_my_sessions, list_public_sessions,
    set_visibility,
};
