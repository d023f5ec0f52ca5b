//! Failure classification: maps HTTP statuses and transport errors to outcomes.
//!
//! - 2xx is success
//! - 429 and 5xx are transient
//! - every other status is permanent
//! - connection failures and timeouts are transient; malformed requests or
//!   bodies are permanent

use crate::transport::TransportError;
use crate::types::{DispatchOutcome, DispatchResponse, FailureCause, FailureKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StatusClass {
    Success,
    Transient,
    Permanent,
}

pub(crate) fn classify_status(status: u16) -> StatusClass {
    match status {
        200..=299 => StatusClass::Success,
        429 | 500..=599 => StatusClass::Transient,
        _ => StatusClass::Permanent,
    }
}

pub(crate) fn classify_response(response: DispatchResponse) -> DispatchOutcome {
    match classify_status(response.status) {
        StatusClass::Success => DispatchOutcome::Success(response),
        StatusClass::Transient => {
            DispatchOutcome::TransientFailure(FailureCause::from_response(&response))
        }
        StatusClass::Permanent => {
            DispatchOutcome::PermanentFailure(FailureCause::from_response(&response))
        }
    }
}

pub(crate) fn classify_transport_error(err: &TransportError) -> DispatchOutcome {
    let message = err.to_string();
    match err {
        TransportError::Timeout(_) => {
            DispatchOutcome::TransientFailure(FailureCause::new(FailureKind::Timeout, message))
        }
        TransportError::Connect(_) => {
            DispatchOutcome::TransientFailure(FailureCause::new(FailureKind::Connect, message))
        }
        TransportError::Http(e) => {
            if e.is_timeout() {
                DispatchOutcome::TransientFailure(FailureCause::new(FailureKind::Timeout, message))
            } else if e.is_connect() {
                DispatchOutcome::TransientFailure(FailureCause::new(FailureKind::Connect, message))
            } else if e.is_decode() || e.is_body() {
                DispatchOutcome::PermanentFailure(FailureCause::new(FailureKind::Malformed, message))
            } else if e.is_request() {
                DispatchOutcome::TransientFailure(FailureCause::new(FailureKind::Other, message))
            } else {
                DispatchOutcome::PermanentFailure(FailureCause::new(FailureKind::Other, message))
            }
        }
        TransportError::InvalidRequest(_) => {
            DispatchOutcome::PermanentFailure(FailureCause::new(FailureKind::Validation, message))
        }
        TransportError::Other(_) => {
            DispatchOutcome::PermanentFailure(FailureCause::new(FailureKind::Other, message))
        }
    }
}
