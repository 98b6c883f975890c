//! Booking admission, cancellation and attendance.
//!
//! Every mutation runs under the session lock, and admission additionally
//! under the member lock, so the capacity counters, waitlist positions and
//! the member's own schedule are read and written as one unit. Side effects
//! are collected in an [`Outbox`] and dispatched once the locks are gone.

use std::sync::Arc;

use chrono::{Days, Duration};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};
use utoipa::ToSchema;

use crate::clock::ClubTime;
use crate::error::BookingError;
use crate::locks::LockRegistry;
use crate::models::{
    BookingId, ClassBooking, ClassSession, GymClass, MemberId, SessionId, TenantContext,
};
use crate::notify::{Dispatcher, Notification, NotificationKind, Outbox, WebhookEvent};
use crate::payment::{
    ClassPackOption, MembershipOption, PayPerEntryOption, PaymentChoice, PaymentSourceResolver,
};
use crate::status::{BookingAction, BookingStatus, SessionStatus};
use crate::store::{SchedulingStore, UnitOfWork};
use crate::waitlist::WaitlistManager;

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct NewBooking {
    pub session_id: SessionId,
    pub member_id: MemberId,
    #[serde(flatten)]
    pub payment: PaymentChoice,
    pub notes: Option<String>,
}

/// What a member may do for one session, and with which funds.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct BookingOptions {
    pub can_book: bool,
    pub reason: Option<String>,
    pub available_spots: u32,
    /// A booking made now would join the waitlist.
    pub would_be_waitlisted: bool,
    pub membership_option: Option<MembershipOption>,
    pub class_pack_options: Vec<ClassPackOption>,
    pub pay_per_entry_option: Option<PayPerEntryOption>,
}

pub struct BookingEngine {
    store: Arc<dyn SchedulingStore>,
    payments: PaymentSourceResolver,
    waitlist: WaitlistManager,
    locks: Arc<LockRegistry>,
    dispatcher: Dispatcher,
    time: ClubTime,
}

impl BookingEngine {
    pub fn new(
        store: Arc<dyn SchedulingStore>,
        payments: PaymentSourceResolver,
        locks: Arc<LockRegistry>,
        dispatcher: Dispatcher,
        time: ClubTime,
    ) -> Self {
        Self {
            store,
            payments,
            waitlist: WaitlistManager::new(),
            locks,
            dispatcher,
            time,
        }
    }

    async fn load_session(
        &self,
        ctx: &TenantContext,
        id: SessionId,
    ) -> Result<ClassSession, BookingError> {
        ctx.scope(self.store.session(id).await?, "session", id)
    }

    async fn load_class(
        &self,
        ctx: &TenantContext,
        session: &ClassSession,
    ) -> Result<GymClass, BookingError> {
        ctx.scope(
            self.store.gym_class(session.gym_class_id).await?,
            "gym class",
            session.gym_class_id,
        )
    }

    /// True once the cancellation deadline before the session start passed.
    pub fn is_late_cancellation(
        &self,
        session: &ClassSession,
        gym_class: &GymClass,
    ) -> Result<bool, BookingError> {
        let hours = gym_class.cancellation_deadline_hours;
        let deadline = session
            .starts_at()
            .checked_sub_signed(Duration::hours(i64::from(hours)))
            .ok_or_else(|| {
                BookingError::Validation(format!(
                    "cancellation deadline of {hours} hours is out of range"
                ))
            })?;
        Ok(self.time.local_now() > deadline)
    }

    fn check_booking_window(
        &self,
        session: &ClassSession,
        gym_class: &GymClass,
    ) -> Result<(), BookingError> {
        if !session.status.is_bookable() {
            return Err(BookingError::State(format!(
                "cannot book a {} session",
                session.status
            )));
        }
        if !gym_class.is_active() {
            return Err(BookingError::Validation(format!(
                "{} is not accepting bookings",
                gym_class.name
            )));
        }
        let now = self.time.local_now();
        if session.starts_at() <= now {
            return Err(BookingError::Validation("session has already started".into()));
        }
        let opens_until = now
            .date()
            .checked_add_days(Days::new(u64::from(gym_class.advance_booking_days)));
        if opens_until.is_some_and(|last| session.session_date > last) {
            return Err(BookingError::Validation(format!(
                "bookings open {} days before the session",
                gym_class.advance_booking_days
            )));
        }
        Ok(())
    }

    fn check_capacity(
        &self,
        session: &ClassSession,
        gym_class: &GymClass,
    ) -> Result<BookingStatus, BookingError> {
        if session.has_available_spots() {
            Ok(BookingStatus::Confirmed)
        } else if gym_class.waitlist_enabled && session.can_join_waitlist(gym_class.max_waitlist_size) {
            Ok(BookingStatus::Waitlisted)
        } else {
            Err(BookingError::Validation("session full, no waitlist".into()))
        }
    }

    /// Rejects a booking whose session overlaps another active booking the
    /// member holds on the same day. Callers hold the member lock.
    async fn check_member_overlap(
        &self,
        ctx: &TenantContext,
        member_id: MemberId,
        session: &ClassSession,
    ) -> Result<(), BookingError> {
        let held = self.store.bookings_for_member(member_id).await?;
        for booking in held
            .iter()
            .filter(|b| b.is_active() && ctx.owns(b.tenant_id) && b.session_id != session.id)
        {
            let Some(other) = self.store.session(booking.session_id).await? else {
                continue;
            };
            if other.status == SessionStatus::Cancelled
                || other.session_date != session.session_date
                || !other.time_range().overlaps(&session.time_range())
            {
                continue;
            }
            let name = self
                .store
                .gym_class(other.gym_class_id)
                .await?
                .map(|class| class.name)
                .unwrap_or_else(|| "another class".to_string());
            return Err(BookingError::Validation(format!(
                "conflict with {name} at {}",
                other.time_range()
            )));
        }
        Ok(())
    }

    pub async fn create_booking(
        &self,
        ctx: &TenantContext,
        request: NewBooking,
    ) -> Result<ClassBooking, BookingError> {
        let member_guard = self.locks.members.lock(&request.member_id).await;
        let session_guard = self.locks.sessions.lock(&request.session_id).await;

        let mut session = self.load_session(ctx, request.session_id).await?;
        let gym_class = self.load_class(ctx, &session).await?;
        self.check_booking_window(&session, &gym_class)?;

        let existing = self.store.bookings_for_session(session.id).await?;
        if existing
            .iter()
            .any(|b| b.member_id == request.member_id && b.is_active())
        {
            return Err(BookingError::Validation(
                "duplicate booking: member already holds this session".into(),
            ));
        }
        self.check_member_overlap(ctx, request.member_id, &session)
            .await?;

        let mut funding = self
            .payments
            .resolve(ctx, request.member_id, &gym_class, &request.payment)
            .await?;
        let status = self.check_capacity(&session, &gym_class)?;
        self.payments.debit(&mut funding, &gym_class).await?;

        let mut booking = ClassBooking {
            id: BookingId::new(),
            tenant_id: ctx.tenant_id,
            session_id: session.id,
            member_id: request.member_id,
            status,
            waitlist_position: None,
            funding,
            booked_by: ctx.actor_id,
            notes: request.notes,
            created_at: self.time.now_utc(),
            promoted_at: None,
            checked_in_at: None,
            cancelled_at: None,
            cancellation_reason: None,
            late_cancellation: false,
        };
        let kind = if status == BookingStatus::Confirmed {
            session.current_bookings += 1;
            NotificationKind::BookingConfirmed
        } else {
            let position = self.waitlist.next_position(&session);
            booking.waitlist_position = Some(position);
            session.waitlist_count += 1;
            NotificationKind::WaitlistAdded { position }
        };

        let unit = UnitOfWork::new().session(session.clone()).booking(booking.clone());
        if let Err(err) = self.store.commit(unit).await {
            if let Err(refund_err) = self.payments.refund(&booking.funding, booking.id).await {
                error!(booking_id = %booking.id, error = %refund_err, "Failed to release debit after aborted booking");
            }
            return Err(err);
        }
        info!(
            booking_id = %booking.id,
            session_id = %session.id,
            member_id = %booking.member_id,
            status = %booking.status,
            source = %booking.funding.source,
            "Booking created"
        );

        drop(session_guard);
        drop(member_guard);
        let mut outbox = Outbox::new();
        outbox.notify(Notification::for_booking(&booking, &session, &gym_class, kind));
        let event = if booking.status == BookingStatus::Confirmed {
            WebhookEvent::BookingConfirmed
        } else {
            WebhookEvent::BookingCreated
        };
        outbox.publish(event, &booking);
        self.dispatcher.flush(outbox);
        Ok(booking)
    }

    /// Cancels a booking, returning its credit unless the cancellation is
    /// late. A freed seat goes to the head of the waitlist. Allowed until the
    /// session completes.
    pub async fn cancel_booking(
        &self,
        ctx: &TenantContext,
        id: BookingId,
        reason: Option<String>,
    ) -> Result<ClassBooking, BookingError> {
        let session_id = self.get_booking(ctx, id).await?.session_id;
        let guard = self.locks.sessions.lock(&session_id).await;

        let mut session = self.load_session(ctx, session_id).await?;
        let gym_class = self.load_class(ctx, &session).await?;
        let mut bookings = self.store.bookings_for_session(session_id).await?;
        let index = bookings
            .iter()
            .position(|b| b.id == id)
            .ok_or_else(|| BookingError::not_found("booking", id))?;

        let previous = bookings[index].status;
        let next = previous.transition(BookingAction::Cancel)?;
        if !matches!(
            session.status,
            SessionStatus::Scheduled | SessionStatus::InProgress
        ) {
            return Err(BookingError::State(format!(
                "cannot cancel a booking for a {} session",
                session.status
            )));
        }

        let late = self.is_late_cancellation(&session, &gym_class)?;
        let funding = bookings[index].funding.clone();
        let refunded = if late {
            if funding.class_deducted {
                info!(booking_id = %id, "Late cancellation, credit withheld");
            }
            false
        } else {
            self.payments.refund(&funding, id).await?
        };

        let now = self.time.now_utc();
        {
            let booking = &mut bookings[index];
            booking.status = next;
            booking.waitlist_position = None;
            booking.cancelled_at = Some(now);
            booking.cancellation_reason = reason;
            booking.late_cancellation = late;
        }

        let mut changed = vec![id];
        let mut promoted = None;
        match previous {
            BookingStatus::Confirmed => {
                session.current_bookings = session.current_bookings.saturating_sub(1);
                if let Some((head, moved)) = self.waitlist.promote(&mut session, &mut bookings, now)? {
                    promoted = Some(head);
                    changed.push(head);
                    changed.extend(moved);
                }
            }
            _ => changed.extend(self.waitlist.reorder(&mut session, &mut bookings)),
        }

        let cancelled = bookings[index].clone();
        let mut outbox = Outbox::new();
        outbox.notify(Notification::for_booking(
            &cancelled,
            &session,
            &gym_class,
            NotificationKind::BookingCancelled { late },
        ));
        outbox.publish(WebhookEvent::BookingCancelled, &cancelled);
        if let Some(head) = promoted.and_then(|head| bookings.iter().find(|b| b.id == head)) {
            outbox.notify(Notification::for_booking(
                head,
                &session,
                &gym_class,
                NotificationKind::WaitlistPromoted,
            ));
            outbox.publish(WebhookEvent::BookingConfirmed, head);
        }

        let unit = UnitOfWork::new()
            .session(session.clone())
            .bookings(bookings.into_iter().filter(|b| changed.contains(&b.id)));
        if let Err(err) = self.store.commit(unit).await {
            if refunded {
                let mut funding = funding;
                if let Err(debit_err) = self.payments.debit(&mut funding, &gym_class).await {
                    error!(booking_id = %id, error = %debit_err, "Failed to restore debit after aborted cancellation");
                }
            }
            return Err(err);
        }
        info!(
            booking_id = %id,
            session_id = %session_id,
            late,
            refunded,
            promoted = ?promoted,
            "Booking cancelled"
        );

        drop(guard);
        self.dispatcher.flush(outbox);
        Ok(cancelled)
    }

    pub async fn check_in(
        &self,
        ctx: &TenantContext,
        id: BookingId,
    ) -> Result<ClassBooking, BookingError> {
        let session_id = self.get_booking(ctx, id).await?.session_id;
        let guard = self.locks.sessions.lock(&session_id).await;

        let mut booking = self.get_booking(ctx, id).await?;
        let mut session = self.load_session(ctx, session_id).await?;
        if !matches!(
            session.status,
            SessionStatus::Scheduled | SessionStatus::InProgress
        ) {
            return Err(BookingError::State(format!(
                "cannot check in to a {} session",
                session.status
            )));
        }
        let gym_class = self.load_class(ctx, &session).await?;
        booking.status = booking.status.transition(BookingAction::CheckIn)?;
        booking.checked_in_at = Some(self.time.now_utc());
        self.payments
            .debit_at_check_in(&mut booking.funding, &gym_class, booking.id)
            .await?;
        session.checked_in_count += 1;

        self.store
            .commit(UnitOfWork::new().session(session).booking(booking.clone()))
            .await?;
        info!(booking_id = %id, member_id = %booking.member_id, "Member checked in");

        drop(guard);
        let mut outbox = Outbox::new();
        outbox.publish(WebhookEvent::BookingCompleted, &booking);
        self.dispatcher.flush(outbox);
        Ok(booking)
    }

    /// Records a no-show. The seat is not returned to the waitlist.
    pub async fn mark_no_show(
        &self,
        ctx: &TenantContext,
        id: BookingId,
    ) -> Result<ClassBooking, BookingError> {
        let session_id = self.get_booking(ctx, id).await?.session_id;
        let guard = self.locks.sessions.lock(&session_id).await;

        let mut booking = self.get_booking(ctx, id).await?;
        let session = self.load_session(ctx, session_id).await?;
        if !matches!(
            session.status,
            SessionStatus::InProgress | SessionStatus::Completed
        ) {
            return Err(BookingError::State(format!(
                "cannot mark a no-show for a {} session",
                session.status
            )));
        }
        booking.status = booking.status.transition(BookingAction::MarkNoShow)?;
        self.store
            .commit(UnitOfWork::new().booking(booking.clone()))
            .await?;
        warn!(booking_id = %id, member_id = %booking.member_id, "Member marked as no-show");

        drop(guard);
        let mut outbox = Outbox::new();
        outbox.publish(WebhookEvent::BookingNoShow, &booking);
        self.dispatcher.flush(outbox);
        Ok(booking)
    }

    /// Administrative cleanup of cancelled and no-show bookings.
    pub async fn delete_booking(&self, ctx: &TenantContext, id: BookingId) -> Result<(), BookingError> {
        let booking = self.get_booking(ctx, id).await?;
        let _guard = self.locks.sessions.lock(&booking.session_id).await;
        if !booking.status.is_retired() {
            return Err(BookingError::State(format!(
                "cannot delete a {} booking",
                booking.status
            )));
        }
        self.store.delete_booking(id).await?;
        info!(booking_id = %id, "Booking deleted");
        Ok(())
    }

    pub async fn get_booking(
        &self,
        ctx: &TenantContext,
        id: BookingId,
    ) -> Result<ClassBooking, BookingError> {
        ctx.scope(self.store.booking(id).await?, "booking", id)
    }

    pub async fn session_bookings(
        &self,
        ctx: &TenantContext,
        session_id: SessionId,
    ) -> Result<Vec<ClassBooking>, BookingError> {
        self.load_session(ctx, session_id).await?;
        self.store.bookings_for_session(session_id).await
    }

    /// Waitlisted bookings of a session, head first.
    pub async fn waitlist(
        &self,
        ctx: &TenantContext,
        session_id: SessionId,
    ) -> Result<Vec<ClassBooking>, BookingError> {
        let bookings = self.session_bookings(ctx, session_id).await?;
        Ok(self
            .waitlist
            .ordered(&bookings)
            .into_iter()
            .cloned()
            .collect())
    }

    pub async fn member_bookings(
        &self,
        ctx: &TenantContext,
        member_id: MemberId,
    ) -> Result<Vec<ClassBooking>, BookingError> {
        let bookings = self.store.bookings_for_member(member_id).await?;
        Ok(bookings
            .into_iter()
            .filter(|booking| ctx.owns(booking.tenant_id))
            .collect())
    }

    pub async fn get_booking_options(
        &self,
        ctx: &TenantContext,
        session_id: SessionId,
        member_id: MemberId,
    ) -> Result<BookingOptions, BookingError> {
        let session = self.load_session(ctx, session_id).await?;
        let gym_class = self.load_class(ctx, &session).await?;
        let payment = self.payments.options(ctx, member_id, &gym_class).await?;

        let mut reason = self.check_booking_window(&session, &gym_class).err();
        if reason.is_none() {
            let bookings = self.store.bookings_for_session(session_id).await?;
            if bookings.iter().any(|b| b.member_id == member_id && b.is_active()) {
                reason = Some(BookingError::Validation(
                    "member already holds this session".into(),
                ));
            }
        }
        if reason.is_none() {
            reason = self.check_member_overlap(ctx, member_id, &session).await.err();
        }
        let capacity = self.check_capacity(&session, &gym_class);
        if reason.is_none() {
            reason = capacity.as_ref().err().map(|err| BookingError::Validation(err.to_string()));
        }
        if reason.is_none() && payment.is_empty() {
            reason = Some(BookingError::Validation(
                "no payment source available".into(),
            ));
        }

        Ok(BookingOptions {
            can_book: reason.is_none(),
            reason: reason.map(|err| err.to_string()),
            available_spots: session.available_spots(),
            would_be_waitlisted: matches!(capacity, Ok(BookingStatus::Waitlisted)),
            membership_option: payment.membership_option,
            class_pack_options: payment.class_pack_options,
            pay_per_entry_option: payment.pay_per_entry_option,
        })
    }
}
