use serde::{Deserialize, Serialize};

use crate::model::*;

use super::conflict::find_conflict;

/// Why a candidate reservation was refused.
///
/// `code()` is the stable machine-readable form; `Display` renders the
/// default human-facing message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectionReason {
    EndBeforeStart,
    StartInPast,
    BeforeWindowOpen,
    AfterWindowClose,
    ResourceConflict,
    UserDoubleBooking,
}

impl RejectionReason {
    pub const ALL: [RejectionReason; 6] = [
        RejectionReason::EndBeforeStart,
        RejectionReason::StartInPast,
        RejectionReason::BeforeWindowOpen,
        RejectionReason::AfterWindowClose,
        RejectionReason::ResourceConflict,
        RejectionReason::UserDoubleBooking,
    ];

    pub fn code(&self) -> &'static str {
        match self {
            RejectionReason::EndBeforeStart => "end_before_start",
            RejectionReason::StartInPast => "start_in_past",
            RejectionReason::BeforeWindowOpen => "before_window_open",
            RejectionReason::AfterWindowClose => "after_window_close",
            RejectionReason::ResourceConflict => "resource_conflict",
            RejectionReason::UserDoubleBooking => "user_double_booking",
        }
    }

    pub fn message(&self) -> &'static str {
        match self {
            RejectionReason::EndBeforeStart => "End must later than Start",
            RejectionReason::StartInPast => "Start time can't be in the past",
            RejectionReason::BeforeWindowOpen => {
                "Start time is before the resource available start"
            }
            RejectionReason::AfterWindowClose => "End time is after the resource available end",
            RejectionReason::ResourceConflict => "Reservation in that period",
            RejectionReason::UserDoubleBooking => "You can only make one reservation at a time",
        }
    }
}

impl std::fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.message())
    }
}

impl std::error::Error for RejectionReason {}

/// Decide whether `candidate` may be booked on `resource`.
///
/// Checks run in a fixed order and stop at the first failure:
/// chronology, past start, window open, window close, resource conflict,
/// user double booking. Pure: nothing is mutated or persisted.
pub fn validate(
    candidate: &Span,
    resource: &Resource,
    resource_reservations: &[Span],
    user_reservations: &[Span],
    now: Ms,
) -> Result<(), RejectionReason> {
    if !candidate.is_chronological() {
        return Err(RejectionReason::EndBeforeStart);
    }
    if candidate.is_in_past(now) {
        return Err(RejectionReason::StartInPast);
    }
    if resource.window.opens_after(candidate) {
        return Err(RejectionReason::BeforeWindowOpen);
    }
    if resource.window.closes_before(candidate) {
        return Err(RejectionReason::AfterWindowClose);
    }
    if find_conflict(candidate, resource_reservations).is_some() {
        return Err(RejectionReason::ResourceConflict);
    }
    if find_conflict(candidate, user_reservations).is_some() {
        return Err(RejectionReason::UserDoubleBooking);
    }
    Ok(())
}
