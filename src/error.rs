use std::fmt;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use chrono::NaiveDate;
use thiserror::Error;
use tracing::error;

use crate::models::{SessionId, TimeRange, TrainerId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictKind {
    Trainer,
    Location,
}

impl fmt::Display for ConflictKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConflictKind::Trainer => f.write_str("trainer"),
            ConflictKind::Location => f.write_str("location"),
        }
    }
}

#[derive(Debug, Error)]
pub enum BookingError {
    #[error("{0} not found")]
    NotFound(String),
    #[error("{0}")]
    Validation(String),
    #[error("{kind} conflict on {date}: overlaps existing session {existing} ({range})")]
    Conflict {
        kind: ConflictKind,
        existing: SessionId,
        date: NaiveDate,
        range: TimeRange,
    },
    #[error("trainer {trainer} is not available on {date} ({range})")]
    TrainerUnavailable {
        trainer: TrainerId,
        date: NaiveDate,
        range: TimeRange,
    },
    #[error("invalid state: {0}")]
    State(String),
    #[error("storage failure: {0}")]
    Storage(String),
}

impl BookingError {
    pub fn not_found(entity: &str, id: impl fmt::Display) -> Self {
        BookingError::NotFound(format!("{entity} {id}"))
    }
}

#[derive(Debug)]
pub enum ApiError {
    Unauthorized(String),
    BadRequest(String),
    NotFound(String),
    Conflict(String),
    Unprocessable(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg).into_response(),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg).into_response(),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg).into_response(),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg).into_response(),
            ApiError::Unprocessable(msg) => {
                (StatusCode::UNPROCESSABLE_ENTITY, msg).into_response()
            }
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg).into_response(),
        }
    }
}

impl From<BookingError> for ApiError {
    fn from(value: BookingError) -> Self {
        match value {
            BookingError::NotFound(_) => ApiError::NotFound(value.to_string()),
            BookingError::Validation(_) => ApiError::BadRequest(value.to_string()),
            BookingError::Conflict { .. } | BookingError::TrainerUnavailable { .. } => {
                ApiError::Conflict(value.to_string())
            }
            BookingError::State(_) => ApiError::Unprocessable(value.to_string()),
            BookingError::Storage(err) => {
                error!("Storage error: {err}");
                ApiError::Internal("Failed to persist booking data".into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveTime;

    use super::*;

    #[test]
    fn test_conflict_message_names_existing_range() {
        let err = BookingError::Conflict {
            kind: ConflictKind::Trainer,
            existing: SessionId::new(),
            date: NaiveDate::from_ymd_opt(2025, 12, 15).unwrap(),
            range: TimeRange::new(
                NaiveTime::from_hms_opt(10, 30, 0).unwrap(),
                NaiveTime::from_hms_opt(11, 30, 0).unwrap(),
            ),
        };
        let message = err.to_string();
        assert!(message.starts_with("trainer conflict on 2025-12-15"));
        assert!(message.ends_with("(10:30-11:30)"));
    }

    #[test]
    fn test_status_mapping() {
        let cases = [
            (BookingError::not_found("session", "x"), StatusCode::NOT_FOUND),
            (BookingError::Validation("nope".into()), StatusCode::BAD_REQUEST),
            (
                BookingError::State("cancelled".into()),
                StatusCode::UNPROCESSABLE_ENTITY,
            ),
            (
                BookingError::Storage("disk".into()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, status) in cases {
            let response = ApiError::from(err).into_response();
            assert_eq!(response.status(), status);
        }
    }
}
