//! Direct session management: one-off creation, edits, trainer assignment
//! and the SCHEDULED → IN_PROGRESS → COMPLETED / CANCELLED lifecycle.

use std::sync::Arc;

use chrono::{Duration, NaiveDate, NaiveTime};
use serde::Deserialize;
use tracing::{error, info};
use utoipa::ToSchema;

use crate::clock::ClubTime;
use crate::conflict::{SessionConflictValidator, Slot};
use crate::error::BookingError;
use crate::locks::LockRegistry;
use crate::models::{
    BookingId, ClassSession, Funding, GymClass, GymClassId, LocationId, SessionId,
    TenantContext, TrainerId,
};
use crate::notify::{Dispatcher, Notification, NotificationKind, Outbox, WebhookEvent};
use crate::payment::PaymentSourceResolver;
use crate::status::{BookingAction, BookingStatus, SessionAction};
use crate::store::{SchedulingStore, UnitOfWork};
use crate::validation::{validate_capacity, validate_time_range};
use crate::waitlist::WaitlistManager;

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct NewSession {
    pub gym_class_id: GymClassId,
    pub session_date: NaiveDate,
    #[schema(value_type = String, example = "10:00:00")]
    pub start_time: NaiveTime,
    /// Defaults to the start time plus the class duration.
    #[schema(value_type = Option<String>, example = "11:00:00")]
    pub end_time: Option<NaiveTime>,
    pub location_id: Option<LocationId>,
    pub trainer_id: Option<TrainerId>,
    pub max_capacity: Option<u32>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
pub struct SessionPatch {
    pub session_date: Option<NaiveDate>,
    #[schema(value_type = Option<String>)]
    pub start_time: Option<NaiveTime>,
    #[schema(value_type = Option<String>)]
    pub end_time: Option<NaiveTime>,
    pub location_id: Option<LocationId>,
    pub trainer_id: Option<TrainerId>,
    pub max_capacity: Option<u32>,
    pub notes: Option<String>,
}

impl SessionPatch {
    fn moves_slot(&self) -> bool {
        self.session_date.is_some()
            || self.start_time.is_some()
            || self.end_time.is_some()
            || self.location_id.is_some()
            || self.trainer_id.is_some()
    }
}

pub struct SessionManager {
    store: Arc<dyn SchedulingStore>,
    validator: SessionConflictValidator,
    payments: PaymentSourceResolver,
    waitlist: WaitlistManager,
    locks: Arc<LockRegistry>,
    dispatcher: Dispatcher,
    time: ClubTime,
}

impl SessionManager {
    pub fn new(
        store: Arc<dyn SchedulingStore>,
        validator: SessionConflictValidator,
        payments: PaymentSourceResolver,
        locks: Arc<LockRegistry>,
        dispatcher: Dispatcher,
        time: ClubTime,
    ) -> Self {
        Self {
            store,
            validator,
            payments,
            waitlist: WaitlistManager::new(),
            locks,
            dispatcher,
            time,
        }
    }

    pub async fn get_session(
        &self,
        ctx: &TenantContext,
        id: SessionId,
    ) -> Result<ClassSession, BookingError> {
        ctx.scope(self.store.session(id).await?, "session", id)
    }

    pub async fn sessions_on(
        &self,
        ctx: &TenantContext,
        date: NaiveDate,
    ) -> Result<Vec<ClassSession>, BookingError> {
        self.store.sessions_on(ctx.tenant_id, date).await
    }

    async fn gym_class(&self, ctx: &TenantContext, id: GymClassId) -> Result<GymClass, BookingError> {
        ctx.scope(self.store.gym_class(id).await?, "gym class", id)
    }

    async fn check_slot(
        &self,
        ctx: &TenantContext,
        gym_class: &GymClass,
        slot: &Slot,
    ) -> Result<(), BookingError> {
        self.validator.validate_no_conflicts(ctx, slot).await?;
        if gym_class.is_personal_training()
            && let Some(trainer) = slot.trainer_id
        {
            self.validator
                .validate_trainer_available(trainer, slot.date, slot.range)
                .await?;
        }
        Ok(())
    }

    pub async fn create_session(
        &self,
        ctx: &TenantContext,
        request: NewSession,
    ) -> Result<ClassSession, BookingError> {
        let gym_class = self.gym_class(ctx, request.gym_class_id).await?;
        if !gym_class.is_active() {
            return Err(BookingError::Validation(format!(
                "{} is not active",
                gym_class.name
            )));
        }
        let end_time = match request.end_time {
            Some(end) => end,
            None => default_end(request.start_time, &gym_class)?,
        };
        let range = validate_time_range(request.start_time, end_time)?;
        let capacity = validate_capacity(
            gym_class.class_type,
            gym_class.pt_session_type,
            request.max_capacity.unwrap_or(gym_class.max_capacity),
        )?;
        let slot = Slot {
            trainer_id: request.trainer_id.or(gym_class.default_trainer_id),
            location_id: request.location_id.unwrap_or(gym_class.location_id),
            date: request.session_date,
            range,
            exclude: None,
        };

        let _schedule_guard = self.locks.schedules.lock(&ctx.tenant_id).await;
        self.check_slot(ctx, &gym_class, &slot).await?;

        let mut session = ClassSession::scheduled(
            &gym_class,
            slot.date,
            range,
            slot.location_id,
            slot.trainer_id,
            Some(capacity),
        );
        session.notes = request.notes;
        let saved = self.store.save_session(session).await?;
        info!(
            session_id = %saved.id,
            gym_class_id = %gym_class.id,
            date = %saved.session_date,
            range = %saved.time_range(),
            "Session created"
        );
        Ok(saved)
    }

    /// Edits a SCHEDULED session. Raising capacity promotes waiting members
    /// into the new seats; capacity cannot fall below confirmed bookings.
    pub async fn update_session(
        &self,
        ctx: &TenantContext,
        id: SessionId,
        patch: SessionPatch,
    ) -> Result<ClassSession, BookingError> {
        let schedule_guard = self.locks.schedules.lock(&ctx.tenant_id).await;
        let session_guard = self.locks.sessions.lock(&id).await;

        let mut session = self.get_session(ctx, id).await?;
        if !session.status.is_bookable() {
            return Err(BookingError::State(format!(
                "cannot update a {} session",
                session.status
            )));
        }
        let gym_class = self.gym_class(ctx, session.gym_class_id).await?;

        if patch.moves_slot() {
            let start = patch.start_time.unwrap_or(session.start_time);
            let end = patch.end_time.unwrap_or(session.end_time);
            let slot = Slot {
                trainer_id: patch.trainer_id.or(session.trainer_id),
                location_id: patch.location_id.unwrap_or(session.location_id),
                date: patch.session_date.unwrap_or(session.session_date),
                range: validate_time_range(start, end)?,
                exclude: Some(session.id),
            };
            self.check_slot(ctx, &gym_class, &slot).await?;
            session.trainer_id = slot.trainer_id;
            session.location_id = slot.location_id;
            session.session_date = slot.date;
            session.start_time = slot.range.start;
            session.end_time = slot.range.end;
        }
        if patch.notes.is_some() {
            session.notes = patch.notes;
        }

        let mut bookings = Vec::new();
        let mut promoted = Vec::new();
        let mut moved = Vec::new();
        if let Some(capacity) = patch.max_capacity {
            let capacity =
                validate_capacity(gym_class.class_type, gym_class.pt_session_type, capacity)?;
            if capacity < session.current_bookings {
                return Err(BookingError::Validation(format!(
                    "capacity {capacity} is below the {} confirmed bookings",
                    session.current_bookings
                )));
            }
            session.max_capacity = capacity;
            if session.has_available_spots() && session.waitlist_count > 0 {
                bookings = self.store.bookings_for_session(id).await?;
                (promoted, moved) =
                    self.waitlist
                        .fill_open_seats(&mut session, &mut bookings, self.time.now_utc())?;
            }
        }

        let mut outbox = Outbox::new();
        let changed: Vec<_> = bookings
            .into_iter()
            .filter(|booking| promoted.contains(&booking.id) || moved.contains(&booking.id))
            .collect();
        for booking in changed.iter().filter(|b| promoted.contains(&b.id)) {
            outbox.notify(Notification::for_booking(
                booking,
                &session,
                &gym_class,
                NotificationKind::WaitlistPromoted,
            ));
            outbox.publish(WebhookEvent::BookingConfirmed, booking);
        }
        self.store
            .commit(UnitOfWork::new().session(session.clone()).bookings(changed))
            .await?;
        info!(session_id = %id, promoted = promoted.len(), "Session updated");

        drop(session_guard);
        drop(schedule_guard);
        self.dispatcher.flush(outbox);
        Ok(session)
    }

    pub async fn assign_trainer(
        &self,
        ctx: &TenantContext,
        id: SessionId,
        trainer_id: TrainerId,
    ) -> Result<ClassSession, BookingError> {
        let patch = SessionPatch {
            trainer_id: Some(trainer_id),
            ..SessionPatch::default()
        };
        self.update_session(ctx, id, patch).await
    }

    pub async fn start_session(
        &self,
        ctx: &TenantContext,
        id: SessionId,
    ) -> Result<ClassSession, BookingError> {
        let _guard = self.locks.sessions.lock(&id).await;
        let mut session = self.get_session(ctx, id).await?;
        session.status = session.status.transition(SessionAction::Start)?;
        let saved = self.store.save_session(session).await?;
        info!(session_id = %id, "Session started");
        Ok(saved)
    }

    /// Closes an in-progress session. Confirmed bookings that never checked
    /// in become no-shows; members still waiting are released and refunded.
    pub async fn complete_session(
        &self,
        ctx: &TenantContext,
        id: SessionId,
    ) -> Result<ClassSession, BookingError> {
        let guard = self.locks.sessions.lock(&id).await;
        let mut session = self.get_session(ctx, id).await?;
        session.status = session.status.transition(SessionAction::Complete)?;

        let now = self.time.now_utc();
        let mut outbox = Outbox::new();
        let mut changed = Vec::new();
        for mut booking in self.store.bookings_for_session(id).await? {
            match booking.status {
                BookingStatus::Confirmed => {
                    booking.status = booking.status.transition(BookingAction::MarkNoShow)?;
                    outbox.publish(WebhookEvent::BookingNoShow, &booking);
                }
                BookingStatus::Waitlisted => {
                    self.refund_quietly(&booking.funding, booking.id).await;
                    booking.status = booking.status.transition(BookingAction::Cancel)?;
                    booking.waitlist_position = None;
                    booking.cancelled_at = Some(now);
                    booking.cancellation_reason = Some("session completed".to_string());
                    outbox.publish(WebhookEvent::BookingCancelled, &booking);
                }
                BookingStatus::CheckedIn | BookingStatus::Cancelled | BookingStatus::NoShow => {
                    continue;
                }
            }
            changed.push(booking);
        }
        session.waitlist_count = 0;

        self.store
            .commit(UnitOfWork::new().session(session.clone()).bookings(changed))
            .await?;
        info!(session_id = %id, checked_in = session.checked_in_count, "Session completed");

        drop(guard);
        self.dispatcher.flush(outbox);
        Ok(session)
    }

    /// Cancels a SCHEDULED session and every active booking on it. Credits
    /// are returned regardless of the late-cancellation window.
    pub async fn cancel_session(
        &self,
        ctx: &TenantContext,
        id: SessionId,
        reason: Option<String>,
    ) -> Result<ClassSession, BookingError> {
        let guard = self.locks.sessions.lock(&id).await;
        let mut session = self.get_session(ctx, id).await?;
        session.status = session.status.transition(SessionAction::Cancel)?;
        session.cancellation_reason = reason.clone();
        let gym_class = self.gym_class(ctx, session.gym_class_id).await?;

        let now = self.time.now_utc();
        let mut outbox = Outbox::new();
        let mut changed = Vec::new();
        for mut booking in self.store.bookings_for_session(id).await? {
            if !booking.is_active() {
                continue;
            }
            self.refund_quietly(&booking.funding, booking.id).await;
            booking.status = booking.status.transition(BookingAction::Cancel)?;
            booking.waitlist_position = None;
            booking.cancelled_at = Some(now);
            booking.cancellation_reason = reason.clone();
            outbox.notify(Notification::for_booking(
                &booking,
                &session,
                &gym_class,
                NotificationKind::SessionCancelled {
                    reason: reason.clone(),
                },
            ));
            outbox.publish(WebhookEvent::BookingCancelled, &booking);
            changed.push(booking);
        }
        session.current_bookings = 0;
        session.waitlist_count = 0;

        let affected = changed.len();
        self.store
            .commit(UnitOfWork::new().session(session.clone()).bookings(changed))
            .await?;
        info!(session_id = %id, affected, "Session cancelled");

        drop(guard);
        self.dispatcher.flush(outbox);
        Ok(session)
    }

    /// Refund used by session-wide fan-outs, where one bad balance must not
    /// block the rest of the cancellation.
    async fn refund_quietly(&self, funding: &Funding, booking_id: BookingId) {
        if let Err(err) = self.payments.refund(funding, booking_id).await {
            error!(%booking_id, error = %err, "Failed to refund booking credit");
        }
    }
}

fn default_end(start: NaiveTime, gym_class: &GymClass) -> Result<NaiveTime, BookingError> {
    let (end, wrapped) =
        start.overflowing_add_signed(Duration::minutes(i64::from(gym_class.duration_minutes)));
    if wrapped != 0 {
        return Err(BookingError::Validation(
            "session would run past midnight".into(),
        ));
    }
    Ok(end)
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::clock::FixedClock;
    use crate::conflict::AlwaysAvailable;
    use crate::error::ConflictKind;
    use crate::ledger::{MemoryClassPackLedger, MemorySubscriptionLedger};
    use crate::models::{ClassType, MemberId, PtSessionType, TenantId};
    use crate::store::MemoryStore;
    use crate::test_support::{booking, date, drain, gym_class, recording_dispatcher, time};

    struct Fixture {
        store: Arc<MemoryStore>,
        manager: SessionManager,
        ctx: TenantContext,
        class: GymClass,
    }

    async fn fixture() -> Fixture {
        fixture_with(Dispatcher::logging()).await
    }

    async fn fixture_with(dispatcher: Dispatcher) -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(FixedClock::new(
            chrono::Utc.with_ymd_and_hms(2025, 12, 14, 6, 0, 0).unwrap(),
        ));
        let time = ClubTime::new(clock, chrono_tz::Asia::Riyadh);
        let payments = PaymentSourceResolver::new(
            Arc::new(MemorySubscriptionLedger::new()),
            Arc::new(MemoryClassPackLedger::new()),
            time.clone(),
        );
        let manager = SessionManager::new(
            store.clone(),
            SessionConflictValidator::new(store.clone(), Arc::new(AlwaysAvailable)),
            payments,
            Arc::new(LockRegistry::new()),
            dispatcher,
            time,
        );
        let tenant = TenantId::new();
        let class = store.save_gym_class(gym_class(tenant)).await.unwrap();
        Fixture {
            store,
            manager,
            ctx: TenantContext::new(tenant),
            class,
        }
    }

    fn request(class: &GymClass, trainer: Option<TrainerId>, hour: u32, minute: u32) -> NewSession {
        NewSession {
            gym_class_id: class.id,
            session_date: date(2025, 12, 15),
            start_time: time(hour, minute),
            end_time: None,
            location_id: Some(LocationId::new()),
            trainer_id: trainer,
            max_capacity: None,
            notes: None,
        }
    }

    #[tokio::test]
    async fn test_trainer_double_booking_is_rejected() {
        let fx = fixture().await;
        let trainer = TrainerId::new();
        fx.manager
            .create_session(&fx.ctx, request(&fx.class, Some(trainer), 10, 30))
            .await
            .unwrap();

        let err = fx
            .manager
            .create_session(&fx.ctx, request(&fx.class, Some(trainer), 10, 0))
            .await
            .unwrap_err();

        match err {
            BookingError::Conflict { kind, range, .. } => {
                assert_eq!(kind, ConflictKind::Trainer);
                assert_eq!(range.to_string(), "10:30-11:30");
            }
            other => panic!("expected trainer conflict, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_update_ignores_own_slot() {
        let fx = fixture().await;
        let created = fx
            .manager
            .create_session(&fx.ctx, request(&fx.class, None, 9, 0))
            .await
            .unwrap();

        let patch = SessionPatch {
            start_time: Some(time(9, 15)),
            end_time: Some(time(10, 15)),
            ..SessionPatch::default()
        };
        let updated = fx.manager.update_session(&fx.ctx, created.id, patch).await.unwrap();
        assert_eq!(updated.time_range().to_string(), "09:15-10:15");
    }

    #[tokio::test]
    async fn test_capacity_changes() {
        let fx = fixture().await;
        let mut session = fx
            .manager
            .create_session(&fx.ctx, request(&fx.class, None, 18, 0))
            .await
            .unwrap();
        session.max_capacity = 1;
        session.current_bookings = 1;
        session.waitlist_count = 1;
        let confirmed = booking(&session, MemberId::new(), BookingStatus::Confirmed);
        let mut waiting = booking(&session, MemberId::new(), BookingStatus::Waitlisted);
        waiting.waitlist_position = Some(1);
        fx.store
            .commit(
                UnitOfWork::new()
                    .session(session.clone())
                    .booking(confirmed)
                    .booking(waiting.clone()),
            )
            .await
            .unwrap();

        let shrink = SessionPatch {
            max_capacity: Some(0),
            ..SessionPatch::default()
        };
        assert!(fx.manager.update_session(&fx.ctx, session.id, shrink).await.is_err());

        let grow = SessionPatch {
            max_capacity: Some(2),
            ..SessionPatch::default()
        };
        let updated = fx.manager.update_session(&fx.ctx, session.id, grow).await.unwrap();
        assert_eq!(updated.current_bookings, 2);
        assert_eq!(updated.waitlist_count, 0);
        let promoted = fx.store.booking(waiting.id).await.unwrap().unwrap();
        assert_eq!(promoted.status, BookingStatus::Confirmed);
    }

    #[tokio::test]
    async fn test_one_on_one_capacity_is_fixed() {
        let fx = fixture().await;
        let mut pt = gym_class(fx.ctx.tenant_id);
        pt.class_type = ClassType::PersonalTraining;
        pt.pt_session_type = Some(PtSessionType::OneOnOne);
        pt.max_capacity = 1;
        let pt = fx.store.save_gym_class(pt).await.unwrap();

        let mut wide = request(&pt, Some(TrainerId::new()), 7, 0);
        wide.max_capacity = Some(2);
        let err = fx.manager.create_session(&fx.ctx, wide).await.unwrap_err();
        assert!(matches!(err, BookingError::Validation(_)));
    }

    #[tokio::test]
    async fn test_lifecycle_and_completion_fan_out() {
        let fx = fixture().await;
        let mut session = fx
            .manager
            .create_session(&fx.ctx, request(&fx.class, None, 6, 0))
            .await
            .unwrap();
        session.current_bookings = 1;
        let absent = booking(&session, MemberId::new(), BookingStatus::Confirmed);
        fx.store
            .commit(UnitOfWork::new().session(session.clone()).booking(absent.clone()))
            .await
            .unwrap();

        assert!(fx.manager.complete_session(&fx.ctx, session.id).await.is_err());
        fx.manager.start_session(&fx.ctx, session.id).await.unwrap();
        let done = fx.manager.complete_session(&fx.ctx, session.id).await.unwrap();
        assert_eq!(done.status, crate::status::SessionStatus::Completed);

        let stored = fx.store.booking(absent.id).await.unwrap().unwrap();
        assert_eq!(stored.status, BookingStatus::NoShow);
        let err = fx
            .manager
            .cancel_session(&fx.ctx, session.id, None)
            .await
            .unwrap_err();
        assert!(matches!(err, BookingError::State(_)));
    }

    #[tokio::test]
    async fn test_cancel_session_cancels_active_bookings() {
        let fx = fixture().await;
        let mut session = fx
            .manager
            .create_session(&fx.ctx, request(&fx.class, None, 12, 0))
            .await
            .unwrap();
        session.current_bookings = 1;
        session.waitlist_count = 1;
        let confirmed = booking(&session, MemberId::new(), BookingStatus::Confirmed);
        let mut waiting = booking(&session, MemberId::new(), BookingStatus::Waitlisted);
        waiting.waitlist_position = Some(1);
        fx.store
            .commit(
                UnitOfWork::new()
                    .session(session.clone())
                    .booking(confirmed.clone())
                    .booking(waiting.clone()),
            )
            .await
            .unwrap();

        let cancelled = fx
            .manager
            .cancel_session(&fx.ctx, session.id, Some("coach sick".into()))
            .await
            .unwrap();

        assert_eq!(cancelled.current_bookings, 0);
        assert_eq!(cancelled.waitlist_count, 0);
        for id in [confirmed.id, waiting.id] {
            let stored = fx.store.booking(id).await.unwrap().unwrap();
            assert_eq!(stored.status, BookingStatus::Cancelled);
            assert_eq!(stored.cancellation_reason.as_deref(), Some("coach sick"));
            assert_eq!(stored.waitlist_position, None);
        }
    }

    #[tokio::test]
    async fn test_completion_publishes_only_changed_bookings() {
        let (dispatcher, mut events) = recording_dispatcher();
        let fx = fixture_with(dispatcher).await;
        let mut session = fx
            .manager
            .create_session(&fx.ctx, request(&fx.class, None, 7, 0))
            .await
            .unwrap();
        session.current_bookings = 2;
        session.checked_in_count = 1;
        let attended = booking(&session, MemberId::new(), BookingStatus::CheckedIn);
        let absent = booking(&session, MemberId::new(), BookingStatus::Confirmed);
        fx.store
            .commit(
                UnitOfWork::new()
                    .session(session.clone())
                    .booking(attended.clone())
                    .booking(absent.clone()),
            )
            .await
            .unwrap();
        fx.manager.start_session(&fx.ctx, session.id).await.unwrap();

        fx.manager.complete_session(&fx.ctx, session.id).await.unwrap();

        assert_eq!(
            drain(&mut events).await,
            vec![(WebhookEvent::BookingNoShow, absent.id)]
        );
    }
}
