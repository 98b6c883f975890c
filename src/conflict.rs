//! Trainer and location double-booking checks, run whenever a session is
//! created, moved or given a new trainer. Bookings never go through here.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use tracing::debug;

use crate::error::{BookingError, ConflictKind};
use crate::models::{ClassSession, LocationId, SessionId, TenantContext, TimeRange, TrainerId};
use crate::status::SessionStatus;
use crate::store::SchedulingStore;

/// Trainer calendar outside this subsystem; consulted for personal training.
#[async_trait]
pub trait TrainerAvailabilityService: Send + Sync {
    async fn is_available(
        &self,
        trainer_id: TrainerId,
        date: NaiveDate,
        range: TimeRange,
    ) -> Result<bool, BookingError>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysAvailable;

#[async_trait]
impl TrainerAvailabilityService for AlwaysAvailable {
    async fn is_available(
        &self,
        _trainer_id: TrainerId,
        _date: NaiveDate,
        _range: TimeRange,
    ) -> Result<bool, BookingError> {
        Ok(true)
    }
}

/// Placement of a session that is about to be created or changed.
#[derive(Debug, Clone, Copy)]
pub struct Slot {
    pub trainer_id: Option<TrainerId>,
    pub location_id: LocationId,
    pub date: NaiveDate,
    pub range: TimeRange,
    /// The session being edited, ignored when scanning for clashes.
    pub exclude: Option<SessionId>,
}

/// Returns the first clash of `slot` against `existing`, trainer before location.
pub fn find_conflict(slot: &Slot, existing: &[ClassSession]) -> Option<BookingError> {
    let candidates = existing.iter().filter(|session| {
        session.status != SessionStatus::Cancelled
            && session.session_date == slot.date
            && Some(session.id) != slot.exclude
            && session.time_range().overlaps(&slot.range)
    });

    let mut location_clash = None;
    for session in candidates {
        if slot.trainer_id.is_some() && session.trainer_id == slot.trainer_id {
            return Some(BookingError::Conflict {
                kind: ConflictKind::Trainer,
                existing: session.id,
                date: slot.date,
                range: session.time_range(),
            });
        }
        if location_clash.is_none() && session.location_id == slot.location_id {
            location_clash = Some(BookingError::Conflict {
                kind: ConflictKind::Location,
                existing: session.id,
                date: slot.date,
                range: session.time_range(),
            });
        }
    }
    location_clash
}

#[derive(Clone)]
pub struct SessionConflictValidator {
    store: Arc<dyn SchedulingStore>,
    trainers: Arc<dyn TrainerAvailabilityService>,
}

impl SessionConflictValidator {
    pub fn new(
        store: Arc<dyn SchedulingStore>,
        trainers: Arc<dyn TrainerAvailabilityService>,
    ) -> Self {
        Self { store, trainers }
    }

    /// Rejects `slot` when it overlaps another live session sharing its
    /// trainer or its location. Callers hold the tenant schedule lock.
    pub async fn validate_no_conflicts(
        &self,
        ctx: &TenantContext,
        slot: &Slot,
    ) -> Result<(), BookingError> {
        if slot.range.start >= slot.range.end {
            return Err(BookingError::Validation(
                "session start time must be before its end time".into(),
            ));
        }
        let existing = self.store.sessions_on(ctx.tenant_id, slot.date).await?;
        match find_conflict(slot, &existing) {
            Some(conflict) => {
                debug!(date = %slot.date, range = %slot.range, "Session slot rejected: {conflict}");
                Err(conflict)
            }
            None => Ok(()),
        }
    }

    pub async fn validate_trainer_available(
        &self,
        trainer_id: TrainerId,
        date: NaiveDate,
        range: TimeRange,
    ) -> Result<(), BookingError> {
        if self.trainers.is_available(trainer_id, date, range).await? {
            Ok(())
        } else {
            Err(BookingError::TrainerUnavailable {
                trainer: trainer_id,
                date,
                range,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TenantId;
    use crate::test_support::{date, gym_class, session, time};

    fn slot(trainer: Option<TrainerId>, location: LocationId, start: (u32, u32), end: (u32, u32)) -> Slot {
        Slot {
            trainer_id: trainer,
            location_id: location,
            date: date(2025, 12, 15),
            range: TimeRange::new(time(start.0, start.1), time(end.0, end.1)),
            exclude: None,
        }
    }

    #[test]
    fn test_trainer_clash_names_existing_range() {
        let class = gym_class(TenantId::new());
        let trainer = TrainerId::new();
        let mut existing = session(&class, date(2025, 12, 15), 10, 30);
        existing.trainer_id = Some(trainer);
        existing.location_id = LocationId::new();

        let conflict = find_conflict(&slot(Some(trainer), LocationId::new(), (10, 0), (11, 0)), &[existing.clone()]);
        match conflict {
            Some(BookingError::Conflict { kind, existing: id, range, .. }) => {
                assert_eq!(kind, ConflictKind::Trainer);
                assert_eq!(id, existing.id);
                assert_eq!(range.to_string(), "10:30-11:30");
            }
            other => panic!("expected trainer conflict, got {other:?}"),
        }
    }

    #[test]
    fn test_location_clash_without_trainer() {
        let class = gym_class(TenantId::new());
        let existing = session(&class, date(2025, 12, 15), 18, 0);

        let conflict = find_conflict(&slot(None, existing.location_id, (18, 30), (19, 30)), &[existing]);
        assert!(matches!(
            conflict,
            Some(BookingError::Conflict { kind: ConflictKind::Location, .. })
        ));
    }

    #[test]
    fn test_back_to_back_cancelled_and_excluded_sessions_pass() {
        let class = gym_class(TenantId::new());
        let trainer = TrainerId::new();
        let mut earlier = session(&class, date(2025, 12, 15), 9, 0);
        earlier.trainer_id = Some(trainer);
        let mut cancelled = session(&class, date(2025, 12, 15), 10, 0);
        cancelled.status = SessionStatus::Cancelled;
        let edited = session(&class, date(2025, 12, 15), 10, 15);

        let mut candidate = slot(Some(trainer), class.location_id, (10, 0), (11, 0));
        candidate.exclude = Some(edited.id);
        assert!(find_conflict(&candidate, &[earlier, cancelled, edited]).is_none());
    }

    #[test]
    fn test_trainer_clash_wins_over_location_clash() {
        let class = gym_class(TenantId::new());
        let trainer = TrainerId::new();
        let same_room = session(&class, date(2025, 12, 15), 10, 0);
        let mut same_trainer = session(&class, date(2025, 12, 15), 10, 30);
        same_trainer.trainer_id = Some(trainer);
        same_trainer.location_id = LocationId::new();

        let conflict = find_conflict(
            &slot(Some(trainer), class.location_id, (10, 0), (11, 0)),
            &[same_room, same_trainer],
        );
        assert!(matches!(
            conflict,
            Some(BookingError::Conflict { kind: ConflictKind::Trainer, .. })
        ));
    }
}
