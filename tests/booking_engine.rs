use std::sync::Arc;

use chrono::{NaiveDate, NaiveTime, TimeZone, Utc};
use class_booking::AppState;
use class_booking::booking::NewBooking;
use class_booking::catalog::{NewClassPack, NewGymClass};
use class_booking::clock::{ClubTime, FixedClock};
use class_booking::error::BookingError;
use class_booking::ledger::{
    ClassPackLedger, MemberClassPackBalance, MemoryClassPackLedger, MemorySubscriptionLedger,
    Subscription, SubscriptionLedger, SubscriptionStatus,
};
use class_booking::models::{
    ClassPricingModel, ClassSession, ClassType, GymClass, LocationId, MemberId, MembershipDebit,
    Money, SubscriptionId, TenantContext, TenantId,
};
use class_booking::notify::Dispatcher;
use class_booking::payment::PaymentChoice;
use class_booking::sessions::NewSession;
use class_booking::settings::Settings;
use class_booking::status::BookingStatus;
use class_booking::store::MemoryStore;

struct Harness {
    state: AppState,
    clock: Arc<FixedClock>,
    packs: Arc<MemoryClassPackLedger>,
    subscriptions: Arc<MemorySubscriptionLedger>,
    ctx: TenantContext,
}

fn settings() -> Settings {
    Settings {
        debug: false,
        auth_token: "engine".to_string(),
        enable_swagger: false,
        port: 0,
        timezone: chrono_tz::Asia::Riyadh,
        webhook_url: None,
        webhook_timeout_secs: 1,
        sweep_interval_secs: 3600,
        max_generation_days: 31,
    }
}

/// Engine wired over in-memory ledgers, club clock at 2025-12-14 09:00 local.
fn harness() -> Harness {
    let clock = Arc::new(FixedClock::new(
        Utc.with_ymd_and_hms(2025, 12, 14, 6, 0, 0).unwrap(),
    ));
    let packs = Arc::new(MemoryClassPackLedger::new());
    let subscriptions = Arc::new(MemorySubscriptionLedger::new());
    let settings = settings();
    let time = ClubTime::new(clock.clone(), settings.timezone);
    let state = AppState::new(
        settings,
        time,
        Arc::new(MemoryStore::new()),
        subscriptions.clone(),
        packs.clone(),
        Dispatcher::logging(),
    );
    Harness {
        state,
        clock,
        packs,
        subscriptions,
        ctx: TenantContext::new(TenantId::new()),
    }
}

fn session_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 12, 15).unwrap()
}

fn new_class(name: &str, capacity: u32, pricing_model: ClassPricingModel) -> NewGymClass {
    NewGymClass {
        name: name.to_string(),
        description: None,
        location_id: LocationId::new(),
        default_trainer_id: None,
        class_type: ClassType::GroupFitness,
        pt_session_type: None,
        duration_minutes: 60,
        max_capacity: capacity,
        waitlist_enabled: true,
        max_waitlist_size: 5,
        deducts_class_from_plan: true,
        membership_debit: MembershipDebit::AtCheckIn,
        pricing_model,
        drop_in_price: None,
        tax_rate_bps: 0,
        advance_booking_days: 7,
        cancellation_deadline_hours: 2,
        color_code: None,
    }
}

impl Harness {
    async fn class(&self, request: NewGymClass) -> GymClass {
        self.state
            .catalog
            .create_gym_class(&self.ctx, request)
            .await
            .unwrap()
    }

    async fn session_on(&self, class: &GymClass, date: NaiveDate, hour: u32) -> ClassSession {
        let request = NewSession {
            gym_class_id: class.id,
            session_date: date,
            start_time: NaiveTime::from_hms_opt(hour, 0, 0).unwrap(),
            end_time: None,
            location_id: None,
            trainer_id: None,
            max_capacity: None,
            notes: None,
        };
        self.state
            .sessions
            .create_session(&self.ctx, request)
            .await
            .unwrap()
    }

    async fn session(&self, class: &GymClass, hour: u32) -> ClassSession {
        self.session_on(class, session_date(), hour).await
    }

    async fn book(
        &self,
        session: &ClassSession,
        member_id: MemberId,
        payment: PaymentChoice,
    ) -> Result<class_booking::models::ClassBooking, BookingError> {
        let request = NewBooking {
            session_id: session.id,
            member_id,
            payment,
            notes: None,
        };
        self.state.bookings.create_booking(&self.ctx, request).await
    }

    async fn pack_balance(&self, member_id: MemberId, credits: u32) -> MemberClassPackBalance {
        let pack = self
            .state
            .catalog
            .create_class_pack(
                &self.ctx,
                NewClassPack {
                    name: "Drop-in pack".to_string(),
                    class_count: credits,
                    price: Money::new(5_000, "SAR"),
                    validity_days: Some(30),
                    valid_class_ids: Vec::new(),
                    valid_class_types: Vec::new(),
                },
            )
            .await
            .unwrap();
        self.state
            .catalog
            .grant_pack(&self.ctx, pack.id, member_id)
            .await
            .unwrap()
    }

    async fn credits(&self, balance: &MemberClassPackBalance) -> u32 {
        self.packs
            .find_balance(balance.id)
            .await
            .unwrap()
            .unwrap()
            .classes_remaining
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_bookings_for_last_seat() {
    // Arrange
    let h = harness();
    let class = h
        .class(new_class("Spin", 1, ClassPricingModel::IncludedInMembership))
        .await;
    let session = h.session(&class, 18).await;

    // Act
    let attempts: Vec<_> = (0..2)
        .map(|_| {
            let engine = h.state.bookings.clone();
            let ctx = h.ctx;
            let request = NewBooking {
                session_id: session.id,
                member_id: MemberId::new(),
                payment: PaymentChoice::complimentary(),
                notes: None,
            };
            tokio::spawn(async move { engine.create_booking(&ctx, request).await })
        })
        .collect();
    let mut outcomes = Vec::new();
    for attempt in attempts {
        outcomes.push(attempt.await.unwrap().unwrap());
    }

    // Assert
    let confirmed = outcomes
        .iter()
        .filter(|b| b.status == BookingStatus::Confirmed)
        .count();
    let waitlisted: Vec<_> = outcomes
        .iter()
        .filter(|b| b.status == BookingStatus::Waitlisted)
        .collect();
    assert_eq!(confirmed, 1);
    assert_eq!(waitlisted.len(), 1);
    assert_eq!(waitlisted[0].waitlist_position, Some(1));

    let stored = h.state.sessions.get_session(&h.ctx, session.id).await.unwrap();
    assert_eq!(stored.current_bookings, 1);
    assert_eq!(stored.waitlist_count, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_overlapping_bookings_for_one_member() {
    // Arrange
    let h = harness();
    let member = MemberId::new();
    let mut sessions = Vec::new();
    for name in ["Spin", "Rowing", "Boxing", "Climbing", "Barre", "Kettlebell"] {
        let class = h
            .class(new_class(name, 10, ClassPricingModel::IncludedInMembership))
            .await;
        sessions.push(h.session(&class, 10).await);
    }

    // Act
    let attempts: Vec<_> = sessions
        .iter()
        .map(|session| {
            let engine = h.state.bookings.clone();
            let ctx = h.ctx;
            let request = NewBooking {
                session_id: session.id,
                member_id: member,
                payment: PaymentChoice::complimentary(),
                notes: None,
            };
            tokio::spawn(async move { engine.create_booking(&ctx, request).await })
        })
        .collect();
    let mut outcomes = Vec::new();
    for attempt in attempts {
        outcomes.push(attempt.await.unwrap());
    }

    // Assert
    let (booked, rejected): (Vec<_>, Vec<_>) = outcomes.into_iter().partition(Result::is_ok);
    assert_eq!(booked.len(), 1);
    assert_eq!(rejected.len(), sessions.len() - 1);
    for err in rejected.into_iter().map(Result::unwrap_err) {
        assert!(matches!(err, BookingError::Validation(_)), "{err:?}");
        assert!(err.to_string().starts_with("conflict with"), "{err}");
    }
    let held = h
        .state
        .bookings
        .member_bookings(&h.ctx, member)
        .await
        .unwrap();
    assert_eq!(held.iter().filter(|b| b.is_active()).count(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_bookings_cannot_spend_one_credit_twice() {
    // Arrange
    let h = harness();
    let member = MemberId::new();
    let class = h
        .class(new_class("Pilates", 8, ClassPricingModel::ClassPackOnly))
        .await;
    let morning = h.session(&class, 10).await;
    let evening = h.session(&class, 19).await;
    let balance = h.pack_balance(member, 1).await;

    // Act
    let attempts: Vec<_> = [morning.id, evening.id]
        .into_iter()
        .map(|session_id| {
            let engine = h.state.bookings.clone();
            let ctx = h.ctx;
            let request = NewBooking {
                session_id,
                member_id: member,
                payment: PaymentChoice::class_pack(balance.id),
                notes: None,
            };
            tokio::spawn(async move { engine.create_booking(&ctx, request).await })
        })
        .collect();
    let mut outcomes = Vec::new();
    for attempt in attempts {
        outcomes.push(attempt.await.unwrap());
    }

    // Assert
    let (booked, rejected): (Vec<_>, Vec<_>) = outcomes.into_iter().partition(Result::is_ok);
    assert_eq!(booked.len(), 1);
    assert_eq!(rejected.len(), 1);
    let err = rejected.into_iter().next().unwrap().unwrap_err();
    assert!(matches!(err, BookingError::Validation(_)), "{err:?}");
    assert!(
        err.to_string().contains("insufficient class pack credits"),
        "{err}"
    );
    assert_eq!(h.credits(&balance).await, 0);
}

#[tokio::test]
async fn test_class_pack_credit_is_spent_and_returned() {
    // Arrange
    let h = harness();
    let member = MemberId::new();
    let class = h
        .class(new_class("Pilates", 8, ClassPricingModel::ClassPackOnly))
        .await;
    let morning = h.session(&class, 10).await;
    let evening = h.session(&class, 19).await;
    let balance = h.pack_balance(member, 1).await;

    // Act
    let booked = h
        .book(&morning, member, PaymentChoice::class_pack(balance.id))
        .await
        .unwrap();
    let rejected = h
        .book(&evening, member, PaymentChoice::class_pack(balance.id))
        .await
        .unwrap_err();
    let spent = h.credits(&balance).await;
    h.state
        .bookings
        .cancel_booking(&h.ctx, booked.id, None)
        .await
        .unwrap();

    // Assert
    assert!(booked.funding.class_deducted);
    assert_eq!(spent, 0);
    assert!(
        rejected.to_string().contains("insufficient class pack credits"),
        "{rejected}"
    );
    assert_eq!(h.credits(&balance).await, 1);
}

#[tokio::test]
async fn test_late_cancellation_withholds_credit() {
    // Arrange
    let h = harness();
    let member = MemberId::new();
    let class = h
        .class(new_class("Boxing", 8, ClassPricingModel::ClassPackOnly))
        .await;
    let session = h.session(&class, 10).await;
    let balance = h.pack_balance(member, 3).await;
    let booked = h
        .book(&session, member, PaymentChoice::class_pack(balance.id))
        .await
        .unwrap();

    // 09:30 local on the session day, inside the two hour deadline.
    h.clock
        .set(Utc.with_ymd_and_hms(2025, 12, 15, 6, 30, 0).unwrap());

    // Act
    let cancelled = h
        .state
        .bookings
        .cancel_booking(&h.ctx, booked.id, Some("overslept".into()))
        .await
        .unwrap();

    // Assert
    assert!(cancelled.late_cancellation);
    assert_eq!(cancelled.status, BookingStatus::Cancelled);
    assert_eq!(h.credits(&balance).await, 2);
}

#[tokio::test]
async fn test_waitlist_stays_dense_and_head_is_promoted() {
    // Arrange
    let h = harness();
    let class = h
        .class(new_class("Yoga", 1, ClassPricingModel::IncludedInMembership))
        .await;
    let session = h.session(&class, 17).await;
    let mut booked = Vec::new();
    for _ in 0..4 {
        booked.push(
            h.book(&session, MemberId::new(), PaymentChoice::complimentary())
                .await
                .unwrap(),
        );
    }

    // Act
    h.state
        .bookings
        .cancel_booking(&h.ctx, booked[2].id, None)
        .await
        .unwrap();
    let after_leave = h.state.bookings.waitlist(&h.ctx, session.id).await.unwrap();
    h.state
        .bookings
        .cancel_booking(&h.ctx, booked[0].id, None)
        .await
        .unwrap();
    let after_promotion = h.state.bookings.waitlist(&h.ctx, session.id).await.unwrap();

    // Assert
    let positions: Vec<_> = after_leave.iter().map(|b| b.waitlist_position).collect();
    assert_eq!(positions, vec![Some(1), Some(2)]);
    assert_eq!(after_leave[0].id, booked[1].id);
    assert_eq!(after_leave[1].id, booked[3].id);

    let promoted = h.state.bookings.get_booking(&h.ctx, booked[1].id).await.unwrap();
    assert_eq!(promoted.status, BookingStatus::Confirmed);
    assert!(promoted.promoted_at.is_some());
    assert_eq!(after_promotion.len(), 1);
    assert_eq!(after_promotion[0].id, booked[3].id);
    assert_eq!(after_promotion[0].waitlist_position, Some(1));

    let stored = h.state.sessions.get_session(&h.ctx, session.id).await.unwrap();
    assert_eq!(stored.current_bookings, 1);
    assert_eq!(stored.waitlist_count, 1);
}

#[tokio::test]
async fn test_duplicate_and_overlapping_bookings_are_rejected() {
    // Arrange
    let h = harness();
    let member = MemberId::new();
    let hiit = h
        .class(new_class("HIIT", 10, ClassPricingModel::IncludedInMembership))
        .await;
    let stretch = h
        .class(new_class("Stretch", 10, ClassPricingModel::IncludedInMembership))
        .await;
    let first = h.session(&hiit, 10).await;
    let clashing = h.session(&stretch, 10).await;
    let later = h.session(&stretch, 11).await;
    h.book(&first, member, PaymentChoice::complimentary())
        .await
        .unwrap();

    // Act
    let duplicate = h
        .book(&first, member, PaymentChoice::complimentary())
        .await
        .unwrap_err();
    let overlap = h
        .book(&clashing, member, PaymentChoice::complimentary())
        .await
        .unwrap_err();
    let adjacent = h.book(&later, member, PaymentChoice::complimentary()).await;

    // Assert
    assert!(duplicate.to_string().contains("duplicate booking"));
    assert_eq!(overlap.to_string(), "conflict with HIIT at 10:00-11:00");
    assert!(adjacent.is_ok());
}

#[tokio::test]
async fn test_membership_class_is_debited_at_check_in() {
    // Arrange
    let h = harness();
    let member = MemberId::new();
    let subscription = Subscription {
        id: SubscriptionId::new(),
        tenant_id: h.ctx.tenant_id,
        member_id: member,
        status: SubscriptionStatus::Active,
        start_date: NaiveDate::from_ymd_opt(2025, 12, 1).unwrap(),
        end_date: NaiveDate::from_ymd_opt(2025, 12, 31).unwrap(),
        classes_remaining: Some(2),
    };
    h.subscriptions.insert(subscription.clone()).await;
    let class = h
        .class(new_class("Strength", 10, ClassPricingModel::IncludedInMembership))
        .await;
    let session = h.session(&class, 8).await;

    // Act
    let booked = h
        .book(&session, member, PaymentChoice::membership())
        .await
        .unwrap();
    let before = h.subscriptions.subscription(subscription.id).await.unwrap();
    let checked_in = h.state.bookings.check_in(&h.ctx, booked.id).await.unwrap();

    // Assert
    assert!(!booked.funding.class_deducted);
    assert_eq!(before.unwrap().classes_remaining, Some(2));
    assert_eq!(checked_in.status, BookingStatus::CheckedIn);
    assert!(checked_in.funding.class_deducted);
    let after = h.subscriptions.subscription(subscription.id).await.unwrap();
    assert_eq!(after.unwrap().classes_remaining, Some(1));
    let stored = h.state.sessions.get_session(&h.ctx, session.id).await.unwrap();
    assert_eq!(stored.checked_in_count, 1);
}

#[tokio::test]
async fn test_booking_window_is_enforced() {
    // Arrange
    let h = harness();
    let class = h
        .class(new_class("Rowing", 10, ClassPricingModel::IncludedInMembership))
        .await;
    let far = h
        .session_on(&class, NaiveDate::from_ymd_opt(2025, 12, 24).unwrap(), 9)
        .await;
    let today = h
        .session_on(&class, NaiveDate::from_ymd_opt(2025, 12, 14).unwrap(), 8)
        .await;

    // Act
    let too_early = h
        .book(&far, MemberId::new(), PaymentChoice::complimentary())
        .await
        .unwrap_err();
    let started = h
        .book(&today, MemberId::new(), PaymentChoice::complimentary())
        .await
        .unwrap_err();

    // Assert
    assert!(matches!(too_early, BookingError::Validation(_)));
    assert!(too_early.to_string().contains("7 days"));
    assert_eq!(started.to_string(), "session has already started");
}

#[tokio::test]
async fn test_booking_options_without_funds() {
    // Arrange
    let h = harness();
    let class = h
        .class(new_class("Barre", 10, ClassPricingModel::IncludedInMembership))
        .await;
    let session = h.session(&class, 12).await;

    // Act
    let options = h
        .state
        .bookings
        .get_booking_options(&h.ctx, session.id, MemberId::new())
        .await
        .unwrap();

    // Assert
    assert!(!options.can_book);
    assert_eq!(options.reason.as_deref(), Some("no payment source available"));
    assert_eq!(options.available_spots, 10);
    assert!(!options.would_be_waitlisted);
}
