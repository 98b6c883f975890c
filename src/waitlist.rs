//! Per-session waitlist bookkeeping.
//!
//! Positions of a session's WAITLISTED bookings always read `1..=N` in
//! creation order, and `waitlist_count` equals `N`. Every method here works
//! on state loaded under the session lock; the caller commits the bookings
//! reported as changed together with the session.

use chrono::{DateTime, Utc};

use crate::error::BookingError;
use crate::models::{BookingId, ClassBooking, ClassSession};
use crate::status::{BookingAction, BookingStatus};

#[derive(Debug, Clone, Copy, Default)]
pub struct WaitlistManager;

impl WaitlistManager {
    pub fn new() -> Self {
        Self
    }

    /// Position a newly admitted waitlist entry takes.
    pub fn next_position(&self, session: &ClassSession) -> u32 {
        session.waitlist_count + 1
    }

    /// Indices of the waitlisted bookings in queue order.
    fn queue(bookings: &[ClassBooking]) -> Vec<usize> {
        let mut queue: Vec<usize> = bookings
            .iter()
            .enumerate()
            .filter(|(_, booking)| booking.status == BookingStatus::Waitlisted)
            .map(|(index, _)| index)
            .collect();
        queue.sort_by_key(|&index| {
            let booking = &bookings[index];
            (booking.waitlist_position.unwrap_or(u32::MAX), booking.created_at)
        });
        queue
    }

    /// Waitlisted bookings of a session, head first.
    pub fn ordered<'a>(&self, bookings: &'a [ClassBooking]) -> Vec<&'a ClassBooking> {
        Self::queue(bookings)
            .into_iter()
            .map(|index| &bookings[index])
            .collect()
    }

    /// Renumbers the queue from 1 without changing its relative order and
    /// resyncs `waitlist_count`. Returns the bookings whose position moved.
    pub fn reorder(&self, session: &mut ClassSession, bookings: &mut [ClassBooking]) -> Vec<BookingId> {
        let queue = Self::queue(bookings);
        let mut moved = Vec::new();
        for (slot, &index) in queue.iter().enumerate() {
            let position = slot as u32 + 1;
            let booking = &mut bookings[index];
            if booking.waitlist_position != Some(position) {
                booking.waitlist_position = Some(position);
                moved.push(booking.id);
            }
        }
        session.waitlist_count = queue.len() as u32;
        moved
    }

    /// Moves the head of the queue into a free seat. Returns the promoted
    /// booking and every booking whose position changed, or `None` when
    /// there is no free seat or nobody is waiting.
    pub fn promote(
        &self,
        session: &mut ClassSession,
        bookings: &mut [ClassBooking],
        now: DateTime<Utc>,
    ) -> Result<Option<(BookingId, Vec<BookingId>)>, BookingError> {
        if !session.has_available_spots() {
            return Ok(None);
        }
        let Some(&head) = Self::queue(bookings).first() else {
            return Ok(None);
        };

        let booking = &mut bookings[head];
        booking.status = booking.status.transition(BookingAction::Promote)?;
        booking.waitlist_position = None;
        booking.promoted_at = Some(now);
        let promoted = booking.id;

        session.current_bookings += 1;
        let moved = self.reorder(session, bookings);
        Ok(Some((promoted, moved)))
    }

    /// Promotes until the session is full or the queue is empty.
    pub fn fill_open_seats(
        &self,
        session: &mut ClassSession,
        bookings: &mut [ClassBooking],
        now: DateTime<Utc>,
    ) -> Result<(Vec<BookingId>, Vec<BookingId>), BookingError> {
        let mut promoted = Vec::new();
        let mut moved = Vec::new();
        while let Some((id, shifted)) = self.promote(session, bookings, now)? {
            promoted.push(id);
            moved.extend(shifted);
        }
        moved.retain(|id| !promoted.contains(id));
        moved.sort();
        moved.dedup();
        Ok((promoted, moved))
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone};

    use super::*;
    use crate::models::{MemberId, TenantId};
    use crate::test_support::{booking, date, gym_class, session};

    fn waitlisted(session: &ClassSession, position: u32, minutes: i64) -> ClassBooking {
        let mut entry = booking(session, MemberId::new(), BookingStatus::Waitlisted);
        entry.waitlist_position = Some(position);
        entry.created_at = Utc.with_ymd_and_hms(2025, 12, 1, 8, 0, 0).unwrap() + Duration::minutes(minutes);
        entry
    }

    fn positions(manager: &WaitlistManager, bookings: &[ClassBooking]) -> Vec<u32> {
        manager
            .ordered(bookings)
            .iter()
            .filter_map(|booking| booking.waitlist_position)
            .collect()
    }

    #[test]
    fn test_promote_takes_head_and_closes_gap() {
        let manager = WaitlistManager::new();
        let class = gym_class(TenantId::new());
        let mut session = session(&class, date(2025, 12, 15), 10, 0);
        session.max_capacity = 1;
        session.waitlist_count = 3;
        let mut bookings = vec![
            waitlisted(&session, 2, 2),
            waitlisted(&session, 1, 1),
            waitlisted(&session, 3, 3),
        ];
        let head = bookings[1].id;

        let (promoted, moved) = manager
            .promote(&mut session, &mut bookings, Utc::now())
            .unwrap()
            .unwrap();

        assert_eq!(promoted, head);
        assert_eq!(bookings[1].status, BookingStatus::Confirmed);
        assert_eq!(bookings[1].waitlist_position, None);
        assert_eq!(moved.len(), 2);
        assert_eq!(positions(&manager, &bookings), vec![1, 2]);
        assert_eq!(session.current_bookings, 1);
        assert_eq!(session.waitlist_count, 2);
    }

    #[test]
    fn test_promote_needs_free_seat() {
        let manager = WaitlistManager::new();
        let class = gym_class(TenantId::new());
        let mut session = session(&class, date(2025, 12, 15), 10, 0);
        session.max_capacity = 1;
        session.current_bookings = 1;
        session.waitlist_count = 1;
        let mut bookings = vec![waitlisted(&session, 1, 0)];

        assert!(manager.promote(&mut session, &mut bookings, Utc::now()).unwrap().is_none());
        assert_eq!(bookings[0].status, BookingStatus::Waitlisted);
    }

    #[test]
    fn test_reorder_after_middle_cancellation_is_dense() {
        let manager = WaitlistManager::new();
        let class = gym_class(TenantId::new());
        let mut session = session(&class, date(2025, 12, 15), 10, 0);
        let mut bookings: Vec<ClassBooking> =
            (1..=5).map(|n| waitlisted(&session, n, i64::from(n))).collect();
        bookings[2].status = BookingStatus::Cancelled;
        bookings[2].waitlist_position = None;

        let moved = manager.reorder(&mut session, &mut bookings);

        assert_eq!(moved, vec![bookings[3].id, bookings[4].id]);
        assert_eq!(positions(&manager, &bookings), vec![1, 2, 3, 4]);
        assert_eq!(session.waitlist_count, 4);
    }

    #[test]
    fn test_fill_open_seats_after_capacity_increase() {
        let manager = WaitlistManager::new();
        let class = gym_class(TenantId::new());
        let mut session = session(&class, date(2025, 12, 15), 10, 0);
        session.max_capacity = 3;
        session.current_bookings = 1;
        session.waitlist_count = 3;
        let mut bookings: Vec<ClassBooking> =
            (1..=3).map(|n| waitlisted(&session, n, i64::from(n))).collect();

        let (promoted, moved) = manager
            .fill_open_seats(&mut session, &mut bookings, Utc::now())
            .unwrap();

        assert_eq!(promoted, vec![bookings[0].id, bookings[1].id]);
        assert_eq!(moved, vec![bookings[2].id]);
        assert_eq!(bookings[2].waitlist_position, Some(1));
        assert_eq!(session.current_bookings, 3);
        assert_eq!(session.waitlist_count, 1);
    }
}
