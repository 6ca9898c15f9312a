use chrono::{DateTime, Utc};

use crate::limits::*;
use crate::model::*;

use super::EngineError;

/// Stateless admission checks, in order, stopping at the first failure.
/// Returns the proposal as an absolute span.
pub fn validate_proposal(
    start: &TimeInput,
    end: &TimeInput,
    now: DateTime<Utc>,
) -> Result<Span, EngineError> {
    let start = start
        .aware()
        .ok_or(EngineError::InvalidInput("start_time must be timezone-aware"))?;
    let end = end
        .aware()
        .ok_or(EngineError::InvalidInput("end_time must be timezone-aware"))?;
    if start >= end {
        return Err(EngineError::InvalidInput("start before end"));
    }
    if start.with_timezone(&Utc) < now {
        return Err(EngineError::InvalidInput("cannot reserve in the past"));
    }
    let span = Span::new(start, end);
    if span.duration_ms() > MAX_RESERVATION_DURATION_MS {
        return Err(EngineError::LimitExceeded("reservation too long"));
    }
    Ok(span)
}

pub fn validate_room_id(room_id: &str) -> Result<(), EngineError> {
    if room_id.is_empty() {
        return Err(EngineError::InvalidInput("room_id must not be empty"));
    }
    if room_id.len() > MAX_ROOM_ID_LEN {
        return Err(EngineError::LimitExceeded("room_id too long"));
    }
    Ok(())
}
