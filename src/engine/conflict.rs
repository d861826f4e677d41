use crate::limits::*;
use crate::model::{Calendar, Ms, Span};

use super::EngineError;

pub(crate) fn now_ms() -> Ms {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_millis() as Ms
}

/// Validate raw bounds and build the span. Ordering violations are a
/// business error; out-of-range or oversized spans are limit violations.
pub(crate) fn validate_span(start: Ms, end: Ms) -> Result<Span, EngineError> {
    if start >= end {
        return Err(EngineError::InvalidInterval { start, end });
    }
    if start < MIN_VALID_TIMESTAMP_MS || end > MAX_VALID_TIMESTAMP_MS {
        return Err(EngineError::LimitExceeded("timestamp out of range"));
    }
    let span = Span::new(start, end);
    if span.duration_ms() > MAX_SPAN_DURATION_MS {
        return Err(EngineError::LimitExceeded("span too wide"));
    }
    Ok(span)
}

/// Reject a candidate span that overlaps any live slot in the calendar.
/// Deleted slots never conflict; booked and available ones both do.
pub(crate) fn check_no_overlap(cal: &Calendar, candidate: &Span) -> Result<(), EngineError> {
    match cal.find_overlap(candidate) {
        Some(conflicting) => Err(EngineError::Overlap {
            candidate: *candidate,
            conflicting,
        }),
        None => Ok(()),
    }
}
