//! Authorization predicates shared by the write and read paths.

use crate::errors::LiveError;
use crate::models::{Session, SessionView};
use common::types::UserId;

/// Require `user_id` to be the session's host before a host-only transition.
///
/// # Errors
///
/// `Forbidden` naming the refused `action` for anyone else, former members included.
pub fn require_host(session: &Session, user_id: UserId, action: &str) -> Result<(), LiveError> {
    if session.is_host(user_id) {
        Ok(())
    } else {
        Err(LiveError::Forbidden(format!("Only the host can {action}")))
    }
}

/// Whether `user_id` may see a session: it is public, they host it, or they are in it.
pub fn can_view(view: &SessionView, user_id: UserId) -> bool {
    view.session.is_public || view.session.is_host(user_id) || view.has_member(user_id)
}
