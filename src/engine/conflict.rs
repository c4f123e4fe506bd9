use crate::limits::*;
use crate::model::*;

use super::EngineError;

pub(crate) fn validate_span(span: &Span) -> Result<(), EngineError> {
    if span.start < MIN_VALID_TIMESTAMP_MS || span.end > MAX_VALID_TIMESTAMP_MS {
        return Err(EngineError::LimitExceeded("timestamp out of range"));
    }
    if span.duration_ms() > MAX_SPAN_DURATION_MS {
        return Err(EngineError::LimitExceeded("span too wide"));
    }
    Ok(())
}

/// Engine limits on a candidate that already passed `validate`. Applied the
/// same way by `reserve`, `check_reservation` and `find_available`.
pub(crate) fn check_limits(span: &Span, rs: &ResourceState) -> Result<(), EngineError> {
    validate_span(span)?;
    if rs.reservations.len() >= MAX_RESERVATIONS_PER_RESOURCE {
        return Err(EngineError::LimitExceeded("too many reservations on resource"));
    }
    Ok(())
}

/// First span in `existing` that overlaps `candidate`, if any.
///
/// Which conflicting span is returned depends on the order of `existing`;
/// whether one is returned does not.
pub fn find_conflict<'a, I>(candidate: &Span, existing: I) -> Option<&'a Span>
where
    I: IntoIterator<Item = &'a Span>,
{
    existing.into_iter().find(|span| span.overlaps(candidate))
}

/// Same scan over reservation records, returning the conflicting reservation.
pub(crate) fn find_conflicting_reservation<'a, I>(
    candidate: &Span,
    existing: I,
) -> Option<&'a Reservation>
where
    I: IntoIterator<Item = &'a Reservation>,
{
    existing.into_iter().find(|r| r.span.overlaps(candidate))
}
