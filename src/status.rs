//! Session and booking lifecycles as explicit transition tables.
//!
//! | Session     | Action   | Next        |
//! |-------------|----------|-------------|
//! | Scheduled   | Start    | InProgress  |
//! | InProgress  | Complete | Completed   |
//! | Scheduled   | Cancel   | Cancelled   |
//!
//! | Booking     | Action     | Next      |
//! |-------------|------------|-----------|
//! | Confirmed   | Cancel     | Cancelled |
//! | Confirmed   | CheckIn    | CheckedIn |
//! | Confirmed   | MarkNoShow | NoShow    |
//! | Waitlisted  | Promote    | Confirmed |
//! | Waitlisted  | Cancel     | Cancelled |
//!
//! Every other pair is rejected with [`BookingError::State`].

use std::fmt;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::error::BookingError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionStatus {
    Scheduled,
    InProgress,
    Completed,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionAction {
    Start,
    Complete,
    Cancel,
}

impl SessionStatus {
    pub fn transition(self, action: SessionAction) -> Result<SessionStatus, BookingError> {
        use SessionAction::*;
        use SessionStatus::*;

        match (self, action) {
            (Scheduled, Start) => Ok(InProgress),
            (InProgress, Complete) => Ok(Completed),
            (Scheduled, Cancel) => Ok(Cancelled),
            (from, action) => Err(BookingError::State(format!(
                "cannot {action} a {from} session"
            ))),
        }
    }

    pub fn is_bookable(self) -> bool {
        self == SessionStatus::Scheduled
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            SessionStatus::Scheduled => "scheduled",
            SessionStatus::InProgress => "in-progress",
            SessionStatus::Completed => "completed",
            SessionStatus::Cancelled => "cancelled",
        };
        f.write_str(label)
    }
}

impl fmt::Display for SessionAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            SessionAction::Start => "start",
            SessionAction::Complete => "complete",
            SessionAction::Cancel => "cancel",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BookingStatus {
    Confirmed,
    Waitlisted,
    Cancelled,
    CheckedIn,
    NoShow,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BookingAction {
    Cancel,
    CheckIn,
    MarkNoShow,
    Promote,
}

impl BookingStatus {
    pub fn transition(self, action: BookingAction) -> Result<BookingStatus, BookingError> {
        use BookingAction::*;
        use BookingStatus::*;

        match (self, action) {
            (Confirmed, Cancel) => Ok(Cancelled),
            (Confirmed, CheckIn) => Ok(CheckedIn),
            (Confirmed, MarkNoShow) => Ok(NoShow),
            (Waitlisted, Promote) => Ok(Confirmed),
            (Waitlisted, Cancel) => Ok(Cancelled),
            (from, action) => Err(BookingError::State(format!(
                "cannot {action} a {from} booking"
            ))),
        }
    }

    /// Holds a seat or a waitlist slot.
    pub fn is_active(self) -> bool {
        matches!(self, BookingStatus::Confirmed | BookingStatus::Waitlisted)
    }

    /// Eligible for administrative deletion.
    pub fn is_retired(self) -> bool {
        matches!(self, BookingStatus::Cancelled | BookingStatus::NoShow)
    }
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            BookingStatus::Confirmed => "confirmed",
            BookingStatus::Waitlisted => "waitlisted",
            BookingStatus::Cancelled => "cancelled",
            BookingStatus::CheckedIn => "checked-in",
            BookingStatus::NoShow => "no-show",
        };
        f.write_str(label)
    }
}

impl fmt::Display for BookingAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            BookingAction::Cancel => "cancel",
            BookingAction::CheckIn => "check in",
            BookingAction::MarkNoShow => "mark as no-show",
            BookingAction::Promote => "promote",
        };
        f.write_str(label)
    }
}
