//! User context for ledger operations
//!
//! Every ledger read and write is scoped to the authenticated user supplied
//! by the upstream gateway. The optional UTC offset travels with the request
//! and, when present, is persisted on the user's profile.

use crate::clock::MAX_UTC_OFFSET_MINUTES;
use crate::error::ProgressError;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UserContext {
    pub user_id: String,
    /// Minutes east of UTC reported by the client, if any
    pub utc_offset_minutes: Option<i32>,
}

impl UserContext {
    /// Validated context; rejects blank user IDs and impossible offsets
    pub fn new(user_id: impl Into<String>) -> Result<Self, ProgressError> {
        let user_id = user_id.into();
        if user_id.trim().is_empty() {
            return Err(ProgressError::InvalidInput("user id must not be empty".into()));
        }
        Ok(Self {
            user_id,
            utc_offset_minutes: None,
        })
    }

    pub fn with_utc_offset(mut self, minutes: i32) -> Result<Self, ProgressError> {
        if minutes.abs() > MAX_UTC_OFFSET_MINUTES {
            return Err(ProgressError::InvalidInput(format!(
                "utc offset {} is outside +/-{} minutes",
                minutes, MAX_UTC_OFFSET_MINUTES
            )));
        }
        self.utc_offset_minutes = Some(minutes);
        Ok(self)
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }
}

impl std::fmt::Display for UserContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "UserContext({})", self.user_id)
    }
}
