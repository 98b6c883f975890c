use std::fmt;

use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, NaiveTime, Utc, Weekday};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::error::BookingError;
use crate::status::{BookingStatus, SessionStatus};

macro_rules! entity_id {
    ($($(#[$meta:meta])* $name:ident),+ $(,)?) => {
        $(
            $(#[$meta])*
            #[derive(
                Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
                ToSchema,
            )]
            #[serde(transparent)]
            pub struct $name(pub Uuid);

            impl $name {
                pub fn new() -> Self {
                    Self(Uuid::new_v4())
                }
            }

            impl Default for $name {
                fn default() -> Self {
                    Self::new()
                }
            }

            impl fmt::Display for $name {
                fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                    self.0.fmt(f)
                }
            }

            impl From<Uuid> for $name {
                fn from(value: Uuid) -> Self {
                    Self(value)
                }
            }
        )+
    };
}

entity_id!(
    TenantId,
    GymClassId,
    ScheduleId,
    SessionId,
    BookingId,
    MemberId,
    TrainerId,
    LocationId,
    ClassPackId,
    BalanceId,
    SubscriptionId,
    OrderId,
);

/// Explicit per-request tenant scope. Every engine call takes one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TenantContext {
    pub tenant_id: TenantId,
    /// Staff member or member performing the call, when known.
    pub actor_id: Option<Uuid>,
}

impl TenantContext {
    pub fn new(tenant_id: TenantId) -> Self {
        Self {
            tenant_id,
            actor_id: None,
        }
    }

    pub fn with_actor(mut self, actor_id: Uuid) -> Self {
        self.actor_id = Some(actor_id);
        self
    }

    pub fn owns(&self, tenant_id: TenantId) -> bool {
        self.tenant_id == tenant_id
    }

    /// Resolves a lookup result, hiding entities of other tenants as missing.
    pub fn scope<T: TenantOwned>(
        &self,
        found: Option<T>,
        entity: &str,
        id: impl fmt::Display,
    ) -> Result<T, BookingError> {
        match found {
            Some(item) if self.owns(item.tenant_id()) => Ok(item),
            _ => Err(BookingError::not_found(entity, id)),
        }
    }
}

pub trait TenantOwned {
    fn tenant_id(&self) -> TenantId;
}

macro_rules! tenant_owned {
    ($($ty:ty),+ $(,)?) => {
        $(
            impl TenantOwned for $ty {
                fn tenant_id(&self) -> TenantId {
                    self.tenant_id
                }
            }
        )+
    };
}

tenant_owned!(GymClass, ClassSchedule, ClassSession, ClassBooking);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClassPricingModel {
    IncludedInMembership,
    PayPerEntry,
    ClassPackOnly,
    Hybrid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentSource {
    MembershipIncluded,
    ClassPack,
    PayPerEntry,
    Complimentary,
}

impl fmt::Display for PaymentSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            PaymentSource::MembershipIncluded => "MEMBERSHIP_INCLUDED",
            PaymentSource::ClassPack => "CLASS_PACK",
            PaymentSource::PayPerEntry => "PAY_PER_ENTRY",
            PaymentSource::Complimentary => "COMPLIMENTARY",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClassType {
    GroupFitness,
    PersonalTraining,
    Workshop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PtSessionType {
    OneOnOne,
    SemiPrivate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GymClassStatus {
    Active,
    Inactive,
    Archived,
}

/// When a membership-funded booking consumes a class from the plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MembershipDebit {
    #[default]
    AtCheckIn,
    AtBooking,
}

/// Amount in minor currency units (halalas, cents).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Money {
    pub amount_minor: i64,
    pub currency: String,
}

impl Money {
    pub fn new(amount_minor: i64, currency: impl Into<String>) -> Self {
        Self {
            amount_minor,
            currency: currency.into(),
        }
    }

    /// Adds tax expressed in basis points, rounding the tax half-up.
    pub fn with_tax(&self, tax_rate_bps: u32) -> Result<Money, BookingError> {
        let overflow = || {
            BookingError::Validation(format!(
                "price {} with {tax_rate_bps} bps tax is out of range",
                self.amount_minor
            ))
        };
        let tax = self
            .amount_minor
            .checked_mul(i64::from(tax_rate_bps))
            .and_then(|scaled| scaled.checked_add(5_000))
            .ok_or_else(overflow)?
            .div_euclid(10_000);
        let total = self.amount_minor.checked_add(tax).ok_or_else(overflow)?;
        Ok(Money::new(total, self.currency.clone()))
    }
}

/// Half-open wall-clock interval `[start, end)` within one day.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeRange {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl TimeRange {
    pub fn new(start: NaiveTime, end: NaiveTime) -> Self {
        Self { start, end }
    }

    pub fn overlaps(&self, other: &TimeRange) -> bool {
        self.start < other.end && other.start < self.end
    }
}

impl fmt::Display for TimeRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}-{}",
            self.start.format("%H:%M"),
            self.end.format("%H:%M")
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct GymClass {
    pub id: GymClassId,
    pub tenant_id: TenantId,
    pub name: String,
    pub description: Option<String>,
    pub location_id: LocationId,
    pub default_trainer_id: Option<TrainerId>,
    pub class_type: ClassType,
    pub pt_session_type: Option<PtSessionType>,
    pub duration_minutes: u32,
    pub max_capacity: u32,
    pub waitlist_enabled: bool,
    pub max_waitlist_size: u32,
    pub deducts_class_from_plan: bool,
    pub membership_debit: MembershipDebit,
    pub pricing_model: ClassPricingModel,
    pub drop_in_price: Option<Money>,
    pub tax_rate_bps: u32,
    pub advance_booking_days: u32,
    pub cancellation_deadline_hours: u32,
    pub color_code: Option<String>,
    pub status: GymClassStatus,
}

impl GymClass {
    pub fn accepts_membership_credits(&self) -> bool {
        matches!(
            self.pricing_model,
            ClassPricingModel::IncludedInMembership | ClassPricingModel::Hybrid
        )
    }

    pub fn accepts_class_pack_credits(&self) -> bool {
        matches!(
            self.pricing_model,
            ClassPricingModel::ClassPackOnly | ClassPricingModel::Hybrid
        )
    }

    pub fn accepts_pay_per_entry(&self) -> bool {
        matches!(
            self.pricing_model,
            ClassPricingModel::PayPerEntry | ClassPricingModel::Hybrid
        )
    }

    pub fn is_active(&self) -> bool {
        self.status == GymClassStatus::Active
    }

    pub fn is_personal_training(&self) -> bool {
        self.class_type == ClassType::PersonalTraining
    }

    pub fn drop_in_price_with_tax(&self) -> Result<Option<Money>, BookingError> {
        self.drop_in_price
            .as_ref()
            .map(|price| price.with_tax(self.tax_rate_bps))
            .transpose()
    }
}

/// Weekly recurrence row expanded into sessions by the schedule generator.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ClassSchedule {
    pub id: ScheduleId,
    pub tenant_id: TenantId,
    pub gym_class_id: GymClassId,
    #[schema(value_type = String, example = "Mon")]
    pub day_of_week: Weekday,
    #[schema(value_type = String, example = "10:00:00")]
    pub start_time: NaiveTime,
    #[schema(value_type = String, example = "11:00:00")]
    pub end_time: NaiveTime,
    pub trainer_id: Option<TrainerId>,
    pub location_id: Option<LocationId>,
    pub effective_from: NaiveDate,
    pub effective_until: Option<NaiveDate>,
    pub override_capacity: Option<u32>,
    pub active: bool,
}

impl ClassSchedule {
    pub fn is_active_on(&self, date: NaiveDate) -> bool {
        self.active
            && self.day_of_week == date.weekday()
            && date >= self.effective_from
            && self.effective_until.is_none_or(|until| date <= until)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ClassSession {
    pub id: SessionId,
    pub tenant_id: TenantId,
    pub gym_class_id: GymClassId,
    pub schedule_id: Option<ScheduleId>,
    pub location_id: LocationId,
    pub trainer_id: Option<TrainerId>,
    pub session_date: NaiveDate,
    #[schema(value_type = String, example = "10:00:00")]
    pub start_time: NaiveTime,
    #[schema(value_type = String, example = "11:00:00")]
    pub end_time: NaiveTime,
    pub max_capacity: u32,
    pub current_bookings: u32,
    pub waitlist_count: u32,
    pub checked_in_count: u32,
    pub status: SessionStatus,
    pub cancellation_reason: Option<String>,
    pub notes: Option<String>,
}

impl ClassSession {
    /// Fresh SCHEDULED instance of `gym_class`; `capacity` overrides the template.
    pub fn scheduled(
        gym_class: &GymClass,
        session_date: NaiveDate,
        range: TimeRange,
        location_id: LocationId,
        trainer_id: Option<TrainerId>,
        capacity: Option<u32>,
    ) -> Self {
        Self {
            id: SessionId::new(),
            tenant_id: gym_class.tenant_id,
            gym_class_id: gym_class.id,
            schedule_id: None,
            location_id,
            trainer_id,
            session_date,
            start_time: range.start,
            end_time: range.end,
            max_capacity: capacity.unwrap_or(gym_class.max_capacity),
            current_bookings: 0,
            waitlist_count: 0,
            checked_in_count: 0,
            status: SessionStatus::Scheduled,
            cancellation_reason: None,
            notes: None,
        }
    }

    pub fn time_range(&self) -> TimeRange {
        TimeRange::new(self.start_time, self.end_time)
    }

    pub fn starts_at(&self) -> NaiveDateTime {
        self.session_date.and_time(self.start_time)
    }

    pub fn has_available_spots(&self) -> bool {
        self.current_bookings < self.max_capacity
    }

    pub fn can_join_waitlist(&self, max_waitlist_size: u32) -> bool {
        self.waitlist_count < max_waitlist_size
    }

    pub fn available_spots(&self) -> u32 {
        self.max_capacity.saturating_sub(self.current_bookings)
    }
}

/// How a booking is paid for, as resolved at admission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Funding {
    pub source: PaymentSource,
    pub subscription_id: Option<SubscriptionId>,
    pub class_pack_balance_id: Option<BalanceId>,
    pub order_id: Option<OrderId>,
    pub paid_amount: Option<Money>,
    /// A ledger credit (class pack or membership) was consumed for this booking.
    pub class_deducted: bool,
}

impl Funding {
    pub fn complimentary() -> Self {
        Self {
            source: PaymentSource::Complimentary,
            subscription_id: None,
            class_pack_balance_id: None,
            order_id: None,
            paid_amount: None,
            class_deducted: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ClassBooking {
    pub id: BookingId,
    pub tenant_id: TenantId,
    pub session_id: SessionId,
    pub member_id: MemberId,
    pub status: BookingStatus,
    pub waitlist_position: Option<u32>,
    pub funding: Funding,
    pub booked_by: Option<Uuid>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub promoted_at: Option<DateTime<Utc>>,
    pub checked_in_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub cancellation_reason: Option<String>,
    pub late_cancellation: bool,
}

impl ClassBooking {
    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }
}
