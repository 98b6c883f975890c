use chrono::{NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use icalendar::{Calendar, Component, Event, EventLike, EventStatus};
use tracing::warn;

use crate::models::{ClassBooking, ClassSession, GymClass};
use crate::status::BookingStatus;

/// One booked session as it appears on a member's calendar.
pub struct CalendarEntry<'a> {
    pub booking: &'a ClassBooking,
    pub session: &'a ClassSession,
    pub gym_class: &'a GymClass,
}

#[derive(Clone)]
pub struct ICalExporter {
    tz: Tz,
}

impl ICalExporter {
    pub fn new(tz: Tz) -> Self {
        Self { tz }
    }

    fn to_utc(&self, local: NaiveDateTime) -> Option<chrono::DateTime<Utc>> {
        self.tz
            .from_local_datetime(&local)
            .earliest()
            .map(|dt| dt.with_timezone(&Utc))
    }

    /// Renders confirmed and waitlisted bookings; other statuses are left out.
    pub fn generate(&self, entries: &[CalendarEntry<'_>]) -> Vec<u8> {
        let mut calendar = Calendar::new();
        calendar.name("Class bookings");

        for entry in entries {
            let status = match entry.booking.status {
                BookingStatus::Confirmed => EventStatus::Confirmed,
                BookingStatus::Waitlisted => EventStatus::Tentative,
                _ => continue,
            };
            let session = entry.session;
            let starts = self.to_utc(session.starts_at());
            let ends = self.to_utc(session.session_date.and_time(session.end_time));
            let (Some(starts), Some(ends)) = (starts, ends) else {
                warn!(session_id = %session.id, "Session time does not exist in club timezone");
                continue;
            };

            let summary = match entry.booking.waitlist_position {
                Some(position) if entry.booking.status == BookingStatus::Waitlisted => {
                    format!("{} (waitlist #{position})", entry.gym_class.name)
                }
                _ => entry.gym_class.name.clone(),
            };

            let mut event = Event::new();
            event.summary(&summary);
            event.starts(starts);
            event.ends(ends);
            event.status(status);
            event.location(&format!("Location {}", session.location_id));
            if let Some(description) = &entry.gym_class.description {
                event.description(description);
            }
            event.uid(&format!("{}@class-booking", entry.booking.id));
            calendar.push(event);
        }

        calendar.to_string().into_bytes()
    }
}
