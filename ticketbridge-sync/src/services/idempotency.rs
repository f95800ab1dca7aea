//! Idempotency admission: at most one execution per fingerprint.

use chrono::Utc;
use diesel::Connection;
use ticketbridge_shared::{AppError, AppResult, ErrorCode};

use crate::repos::processed::{self, Claim};
use crate::AppState;

/// Decision for one inbound fingerprint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// The caller owns this fingerprint and must execute it.
    Execute,
    /// A concurrent delivery holds the fingerprint; answer 202, do nothing.
    DuplicateInFlight,
    /// The fingerprint already reached a successful terminal outcome.
    AlreadyProcessed,
}

impl Admission {
    pub fn duplicate_kind(&self) -> Option<ErrorCode> {
        match self {
            Self::Execute => None,
            Self::DuplicateInFlight => Some(ErrorCode::DuplicateInFlight),
            Self::AlreadyProcessed => Some(ErrorCode::AlreadyProcessed),
        }
    }
}

/// Claim the fingerprint in its own committed transaction so concurrent
/// redeliveries observe the in-progress row immediately. The database
/// uniqueness constraint is the tie-break.
pub fn admit(state: &AppState, fingerprint: &str) -> AppResult<Admission> {
    let mut conn = state
        .db
        .get()
        .map_err(|e| AppError::internal(format!("db pool error: {e}")))?;
    let claim = conn.transaction(|conn| processed::try_claim(conn, fingerprint, Utc::now()))?;
    Ok(match claim {
        Claim::Fresh => Admission::Execute,
        Claim::DuplicateInFlight => Admission::DuplicateInFlight,
        Claim::AlreadyProcessed(_) => Admission::AlreadyProcessed,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicates_map_to_their_error_kinds() {
        assert_eq!(Admission::Execute.duplicate_kind(), None);
        assert_eq!(
            Admission::DuplicateInFlight.duplicate_kind(),
            Some(ErrorCode::DuplicateInFlight)
        );
        assert_eq!(
            Admission::AlreadyProcessed.duplicate_kind(),
            Some(ErrorCode::AlreadyProcessed)
        );
    }
}
