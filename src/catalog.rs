//! Class templates, weekly schedules and class-pack products.

use std::sync::Arc;

use chrono::{Duration, NaiveDate, NaiveTime, Weekday};
use serde::Deserialize;
use tracing::info;
use utoipa::ToSchema;

use crate::clock::ClubTime;
use crate::error::BookingError;
use crate::ledger::{
    BalanceStatus, ClassPack, ClassPackLedger, ClassPackStatus, MemberClassPackBalance,
};
use crate::models::{
    BalanceId, ClassPackId, ClassPricingModel, ClassSchedule, ClassType, GymClass, GymClassId,
    GymClassStatus, LocationId, MemberId, MembershipDebit, Money, OrderId, PtSessionType,
    ScheduleId, TenantContext, TrainerId,
};
use crate::store::SchedulingStore;
use crate::validation::{validate_capacity, validate_gym_class, validate_time_range};

fn default_true() -> bool {
    true
}

fn default_pricing() -> ClassPricingModel {
    ClassPricingModel::IncludedInMembership
}

fn default_class_type() -> ClassType {
    ClassType::GroupFitness
}

fn default_advance_days() -> u32 {
    7
}

fn default_deadline_hours() -> u32 {
    2
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct NewGymClass {
    pub name: String,
    pub description: Option<String>,
    pub location_id: LocationId,
    pub default_trainer_id: Option<TrainerId>,
    #[serde(default = "default_class_type")]
    pub class_type: ClassType,
    pub pt_session_type: Option<PtSessionType>,
    pub duration_minutes: u32,
    pub max_capacity: u32,
    #[serde(default = "default_true")]
    pub waitlist_enabled: bool,
    #[serde(default)]
    pub max_waitlist_size: u32,
    #[serde(default = "default_true")]
    pub deducts_class_from_plan: bool,
    #[serde(default)]
    pub membership_debit: MembershipDebit,
    #[serde(default = "default_pricing")]
    pub pricing_model: ClassPricingModel,
    pub drop_in_price: Option<Money>,
    #[serde(default)]
    pub tax_rate_bps: u32,
    #[serde(default = "default_advance_days")]
    pub advance_booking_days: u32,
    #[serde(default = "default_deadline_hours")]
    pub cancellation_deadline_hours: u32,
    pub color_code: Option<String>,
}

/// Partial update of a class template; absent fields are left untouched.
#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
pub struct GymClassPatch {
    pub name: Option<String>,
    pub description: Option<String>,
    pub location_id: Option<LocationId>,
    pub default_trainer_id: Option<TrainerId>,
    pub duration_minutes: Option<u32>,
    pub max_capacity: Option<u32>,
    pub waitlist_enabled: Option<bool>,
    pub max_waitlist_size: Option<u32>,
    pub deducts_class_from_plan: Option<bool>,
    pub membership_debit: Option<MembershipDebit>,
    pub pricing_model: Option<ClassPricingModel>,
    pub drop_in_price: Option<Money>,
    pub tax_rate_bps: Option<u32>,
    pub advance_booking_days: Option<u32>,
    pub cancellation_deadline_hours: Option<u32>,
    pub color_code: Option<String>,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct NewSchedule {
    pub gym_class_id: GymClassId,
    #[schema(value_type = String, example = "Mon")]
    pub day_of_week: Weekday,
    #[schema(value_type = String, example = "18:00:00")]
    pub start_time: NaiveTime,
    /// Defaults to the start time plus the class duration.
    #[schema(value_type = Option<String>, example = "19:00:00")]
    pub end_time: Option<NaiveTime>,
    pub trainer_id: Option<TrainerId>,
    pub location_id: Option<LocationId>,
    pub effective_from: NaiveDate,
    pub effective_until: Option<NaiveDate>,
    pub override_capacity: Option<u32>,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct NewClassPack {
    pub name: String,
    pub class_count: u32,
    pub price: Money,
    pub validity_days: Option<u32>,
    #[serde(default)]
    pub valid_class_ids: Vec<GymClassId>,
    #[serde(default)]
    pub valid_class_types: Vec<ClassType>,
}

pub struct ClassCatalog {
    store: Arc<dyn SchedulingStore>,
    packs: Arc<dyn ClassPackLedger>,
    time: ClubTime,
}

impl ClassCatalog {
    pub fn new(
        store: Arc<dyn SchedulingStore>,
        packs: Arc<dyn ClassPackLedger>,
        time: ClubTime,
    ) -> Self {
        Self { store, packs, time }
    }

    pub async fn create_gym_class(
        &self,
        ctx: &TenantContext,
        request: NewGymClass,
    ) -> Result<GymClass, BookingError> {
        let gym_class = GymClass {
            id: GymClassId::new(),
            tenant_id: ctx.tenant_id,
            name: request.name.trim().to_string(),
            description: request.description,
            location_id: request.location_id,
            default_trainer_id: request.default_trainer_id,
            class_type: request.class_type,
            pt_session_type: request.pt_session_type,
            duration_minutes: request.duration_minutes,
            max_capacity: request.max_capacity,
            waitlist_enabled: request.waitlist_enabled,
            max_waitlist_size: request.max_waitlist_size,
            deducts_class_from_plan: request.deducts_class_from_plan,
            membership_debit: request.membership_debit,
            pricing_model: request.pricing_model,
            drop_in_price: request.drop_in_price,
            tax_rate_bps: request.tax_rate_bps,
            advance_booking_days: request.advance_booking_days,
            cancellation_deadline_hours: request.cancellation_deadline_hours,
            color_code: request.color_code,
            status: GymClassStatus::Active,
        };
        validate_gym_class(&gym_class)?;
        let saved = self.store.save_gym_class(gym_class).await?;
        info!(tenant_id = %ctx.tenant_id, gym_class_id = %saved.id, name = %saved.name, "Gym class created");
        Ok(saved)
    }

    pub async fn get_gym_class(
        &self,
        ctx: &TenantContext,
        id: GymClassId,
    ) -> Result<GymClass, BookingError> {
        ctx.scope(self.store.gym_class(id).await?, "gym class", id)
    }

    pub async fn list_gym_classes(&self, ctx: &TenantContext) -> Result<Vec<GymClass>, BookingError> {
        self.store.gym_classes(ctx.tenant_id).await
    }

    /// Policy changes apply to sessions generated afterwards only.
    pub async fn update_gym_class(
        &self,
        ctx: &TenantContext,
        id: GymClassId,
        patch: GymClassPatch,
    ) -> Result<GymClass, BookingError> {
        let mut gym_class = self.get_gym_class(ctx, id).await?;
        if gym_class.status == GymClassStatus::Archived {
            return Err(BookingError::State(format!(
                "gym class {id} is archived and cannot be changed"
            )));
        }

        if let Some(name) = patch.name {
            gym_class.name = name.trim().to_string();
        }
        if patch.description.is_some() {
            gym_class.description = patch.description;
        }
        if let Some(location_id) = patch.location_id {
            gym_class.location_id = location_id;
        }
        if patch.default_trainer_id.is_some() {
            gym_class.default_trainer_id = patch.default_trainer_id;
        }
        if let Some(minutes) = patch.duration_minutes {
            gym_class.duration_minutes = minutes;
        }
        if let Some(capacity) = patch.max_capacity {
            gym_class.max_capacity = capacity;
        }
        if let Some(enabled) = patch.waitlist_enabled {
            gym_class.waitlist_enabled = enabled;
        }
        if let Some(size) = patch.max_waitlist_size {
            gym_class.max_waitlist_size = size;
        }
        if let Some(deducts) = patch.deducts_class_from_plan {
            gym_class.deducts_class_from_plan = deducts;
        }
        if let Some(debit) = patch.membership_debit {
            gym_class.membership_debit = debit;
        }
        if let Some(model) = patch.pricing_model {
            gym_class.pricing_model = model;
        }
        if patch.drop_in_price.is_some() {
            gym_class.drop_in_price = patch.drop_in_price;
        }
        if let Some(bps) = patch.tax_rate_bps {
            gym_class.tax_rate_bps = bps;
        }
        if let Some(days) = patch.advance_booking_days {
            gym_class.advance_booking_days = days;
        }
        if let Some(hours) = patch.cancellation_deadline_hours {
            gym_class.cancellation_deadline_hours = hours;
        }
        if patch.color_code.is_some() {
            gym_class.color_code = patch.color_code;
        }

        validate_gym_class(&gym_class)?;
        let saved = self.store.save_gym_class(gym_class).await?;
        info!(gym_class_id = %id, "Gym class updated");
        Ok(saved)
    }

    pub async fn activate(&self, ctx: &TenantContext, id: GymClassId) -> Result<GymClass, BookingError> {
        self.set_status(ctx, id, GymClassStatus::Active).await
    }

    pub async fn deactivate(
        &self,
        ctx: &TenantContext,
        id: GymClassId,
    ) -> Result<GymClass, BookingError> {
        self.set_status(ctx, id, GymClassStatus::Inactive).await
    }

    pub async fn archive(&self, ctx: &TenantContext, id: GymClassId) -> Result<GymClass, BookingError> {
        self.set_status(ctx, id, GymClassStatus::Archived).await
    }

    async fn set_status(
        &self,
        ctx: &TenantContext,
        id: GymClassId,
        next: GymClassStatus,
    ) -> Result<GymClass, BookingError> {
        use GymClassStatus::*;

        let mut gym_class = self.get_gym_class(ctx, id).await?;
        let allowed = match (gym_class.status, next) {
            (Inactive, Active) | (Active, Inactive) => true,
            (Archived, _) => false,
            (_, Archived) => true,
            _ => false,
        };
        if !allowed {
            return Err(BookingError::State(format!(
                "gym class {id} cannot move from {:?} to {next:?}",
                gym_class.status
            )));
        }
        gym_class.status = next;
        let saved = self.store.save_gym_class(gym_class).await?;
        info!(gym_class_id = %id, status = ?next, "Gym class status changed");
        Ok(saved)
    }

    pub async fn create_schedule(
        &self,
        ctx: &TenantContext,
        request: NewSchedule,
    ) -> Result<ClassSchedule, BookingError> {
        let gym_class = self.get_gym_class(ctx, request.gym_class_id).await?;
        if gym_class.status == GymClassStatus::Archived {
            return Err(BookingError::State(format!(
                "gym class {} is archived",
                gym_class.id
            )));
        }
        let end_time = match request.end_time {
            Some(end) => end,
            None => {
                let (end, wrapped) = request
                    .start_time
                    .overflowing_add_signed(Duration::minutes(i64::from(gym_class.duration_minutes)));
                if wrapped != 0 {
                    return Err(BookingError::Validation(
                        "schedule would run past midnight".into(),
                    ));
                }
                end
            }
        };
        validate_time_range(request.start_time, end_time)?;
        if let Some(until) = request.effective_until
            && until < request.effective_from
        {
            return Err(BookingError::Validation(
                "schedule ends before it becomes effective".into(),
            ));
        }
        if let Some(capacity) = request.override_capacity {
            validate_capacity(gym_class.class_type, gym_class.pt_session_type, capacity)?;
        }

        let schedule = ClassSchedule {
            id: ScheduleId::new(),
            tenant_id: ctx.tenant_id,
            gym_class_id: gym_class.id,
            day_of_week: request.day_of_week,
            start_time: request.start_time,
            end_time,
            trainer_id: request.trainer_id,
            location_id: request.location_id,
            effective_from: request.effective_from,
            effective_until: request.effective_until,
            override_capacity: request.override_capacity,
            active: true,
        };
        let saved = self.store.save_schedule(schedule).await?;
        info!(
            schedule_id = %saved.id,
            gym_class_id = %saved.gym_class_id,
            day = %saved.day_of_week,
            "Class schedule created"
        );
        Ok(saved)
    }

    pub async fn deactivate_schedule(
        &self,
        ctx: &TenantContext,
        id: ScheduleId,
    ) -> Result<ClassSchedule, BookingError> {
        let mut schedule = ctx.scope(self.store.schedule(id).await?, "class schedule", id)?;
        schedule.active = false;
        self.store.save_schedule(schedule).await
    }

    pub async fn create_class_pack(
        &self,
        ctx: &TenantContext,
        request: NewClassPack,
    ) -> Result<ClassPack, BookingError> {
        if request.name.trim().is_empty() {
            return Err(BookingError::Validation("class pack name must not be empty".into()));
        }
        if request.class_count == 0 {
            return Err(BookingError::Validation(
                "class pack must contain at least one class".into(),
            ));
        }
        if request.validity_days == Some(0) {
            return Err(BookingError::Validation(
                "class pack validity must be at least one day".into(),
            ));
        }
        if request.price.amount_minor < 0 {
            return Err(BookingError::Validation("class pack price must not be negative".into()));
        }
        let pack = ClassPack {
            id: ClassPackId::new(),
            tenant_id: ctx.tenant_id,
            name: request.name.trim().to_string(),
            class_count: request.class_count,
            price: request.price,
            validity_days: request.validity_days,
            valid_class_ids: request.valid_class_ids,
            valid_class_types: request.valid_class_types,
            status: ClassPackStatus::Active,
        };
        let saved = self.packs.save_pack(pack).await?;
        info!(class_pack_id = %saved.id, classes = saved.class_count, "Class pack created");
        Ok(saved)
    }

    pub async fn get_class_pack(
        &self,
        ctx: &TenantContext,
        id: ClassPackId,
    ) -> Result<ClassPack, BookingError> {
        ctx.scope(self.packs.pack(id).await?, "class pack", id)
    }

    async fn sellable_pack(
        &self,
        ctx: &TenantContext,
        id: ClassPackId,
    ) -> Result<ClassPack, BookingError> {
        let pack = self.get_class_pack(ctx, id).await?;
        if pack.status != ClassPackStatus::Active {
            return Err(BookingError::Validation(format!(
                "class pack {id} is not on sale"
            )));
        }
        Ok(pack)
    }

    /// Complimentary balance issued by staff.
    pub async fn grant_pack(
        &self,
        ctx: &TenantContext,
        pack_id: ClassPackId,
        member_id: MemberId,
    ) -> Result<MemberClassPackBalance, BookingError> {
        let pack = self.sellable_pack(ctx, pack_id).await?;
        let balance = MemberClassPackBalance::grant(member_id, &pack, self.time.now_utc());
        let saved = self.packs.save_balance(balance).await?;
        info!(%member_id, balance_id = %saved.id, class_pack_id = %pack_id, "Class pack granted");
        Ok(saved)
    }

    pub async fn purchase_pack(
        &self,
        ctx: &TenantContext,
        pack_id: ClassPackId,
        member_id: MemberId,
        order_id: OrderId,
    ) -> Result<MemberClassPackBalance, BookingError> {
        let pack = self.sellable_pack(ctx, pack_id).await?;
        let balance =
            MemberClassPackBalance::from_purchase(member_id, &pack, order_id, self.time.now_utc());
        let saved = self.packs.save_balance(balance).await?;
        info!(%member_id, balance_id = %saved.id, %order_id, "Class pack purchased");
        Ok(saved)
    }

    pub async fn get_balance(
        &self,
        ctx: &TenantContext,
        id: BalanceId,
    ) -> Result<MemberClassPackBalance, BookingError> {
        ctx.scope(self.packs.find_balance(id).await?, "class pack balance", id)
    }

    pub async fn cancel_balance(
        &self,
        ctx: &TenantContext,
        id: BalanceId,
    ) -> Result<MemberClassPackBalance, BookingError> {
        let balance = self.get_balance(ctx, id).await?;
        if balance.status == BalanceStatus::Cancelled {
            return Err(BookingError::State(format!(
                "class pack balance {id} is already cancelled"
            )));
        }
        let cancelled = self.packs.cancel_balance(id).await?;
        info!(balance_id = %id, "Class pack balance cancelled");
        Ok(cancelled)
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::clock::FixedClock;
    use crate::ledger::MemoryClassPackLedger;
    use crate::models::TenantId;
    use crate::store::MemoryStore;

    fn catalog() -> ClassCatalog {
        let clock = Arc::new(FixedClock::new(
            chrono::Utc.with_ymd_and_hms(2025, 12, 1, 6, 0, 0).unwrap(),
        ));
        ClassCatalog::new(
            Arc::new(MemoryStore::new()),
            Arc::new(MemoryClassPackLedger::new()),
            ClubTime::new(clock, chrono_tz::Asia::Riyadh),
        )
    }

    fn spin_class() -> NewGymClass {
        NewGymClass {
            name: "  Spin  ".to_string(),
            description: None,
            location_id: LocationId::new(),
            default_trainer_id: None,
            class_type: ClassType::GroupFitness,
            pt_session_type: None,
            duration_minutes: 45,
            max_capacity: 20,
            waitlist_enabled: true,
            max_waitlist_size: 5,
            deducts_class_from_plan: true,
            membership_debit: MembershipDebit::AtCheckIn,
            pricing_model: ClassPricingModel::IncludedInMembership,
            drop_in_price: None,
            tax_rate_bps: 0,
            advance_booking_days: 7,
            cancellation_deadline_hours: 2,
            color_code: Some("#FF8800".to_string()),
        }
    }

    #[tokio::test]
    async fn test_create_and_scope_gym_class() {
        let catalog = catalog();
        let ctx = TenantContext::new(TenantId::new());
        let created = catalog.create_gym_class(&ctx, spin_class()).await.unwrap();
        assert_eq!(created.name, "Spin");

        let other = TenantContext::new(TenantId::new());
        let err = catalog.get_gym_class(&other, created.id).await.unwrap_err();
        assert!(matches!(err, BookingError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_pay_per_entry_needs_price() {
        let catalog = catalog();
        let ctx = TenantContext::new(TenantId::new());
        let mut request = spin_class();
        request.pricing_model = ClassPricingModel::PayPerEntry;
        assert!(catalog.create_gym_class(&ctx, request.clone()).await.is_err());

        request.drop_in_price = Some(Money::new(4_000, "SAR"));
        assert!(catalog.create_gym_class(&ctx, request).await.is_ok());
    }

    #[tokio::test]
    async fn test_archive_is_terminal() {
        let catalog = catalog();
        let ctx = TenantContext::new(TenantId::new());
        let created = catalog.create_gym_class(&ctx, spin_class()).await.unwrap();

        assert!(catalog.activate(&ctx, created.id).await.is_err());
        catalog.deactivate(&ctx, created.id).await.unwrap();
        assert!(catalog.deactivate(&ctx, created.id).await.is_err());
        catalog.archive(&ctx, created.id).await.unwrap();

        let err = catalog.activate(&ctx, created.id).await.unwrap_err();
        assert!(matches!(err, BookingError::State(_)));
        let patch = GymClassPatch {
            max_capacity: Some(10),
            ..Default::default()
        };
        assert!(catalog.update_gym_class(&ctx, created.id, patch).await.is_err());
    }

    #[tokio::test]
    async fn test_schedule_end_defaults_to_duration() {
        let catalog = catalog();
        let ctx = TenantContext::new(TenantId::new());
        let class = catalog.create_gym_class(&ctx, spin_class()).await.unwrap();

        let schedule = catalog
            .create_schedule(
                &ctx,
                NewSchedule {
                    gym_class_id: class.id,
                    day_of_week: Weekday::Mon,
                    start_time: NaiveTime::from_hms_opt(18, 0, 0).unwrap(),
                    end_time: None,
                    trainer_id: None,
                    location_id: None,
                    effective_from: NaiveDate::from_ymd_opt(2025, 12, 1).unwrap(),
                    effective_until: None,
                    override_capacity: None,
                },
            )
            .await
            .unwrap();
        assert_eq!(schedule.end_time, NaiveTime::from_hms_opt(18, 45, 0).unwrap());
    }

    #[tokio::test]
    async fn test_grant_and_purchase_pack() {
        let catalog = catalog();
        let ctx = TenantContext::new(TenantId::new());
        let pack = catalog
            .create_class_pack(
                &ctx,
                NewClassPack {
                    name: "Five Pack".to_string(),
                    class_count: 5,
                    price: Money::new(25_000, "SAR"),
                    validity_days: Some(60),
                    valid_class_ids: Vec::new(),
                    valid_class_types: Vec::new(),
                },
            )
            .await
            .unwrap();

        let member = MemberId::new();
        let granted = catalog.grant_pack(&ctx, pack.id, member).await.unwrap();
        assert_eq!(granted.classes_remaining, 5);
        assert!(granted.order_id.is_none());
        assert_eq!(
            granted.expires_at,
            Some(chrono::Utc.with_ymd_and_hms(2026, 1, 30, 6, 0, 0).unwrap())
        );

        let order = OrderId::new();
        let bought = catalog.purchase_pack(&ctx, pack.id, member, order).await.unwrap();
        assert_eq!(bought.order_id, Some(order));

        catalog.cancel_balance(&ctx, bought.id).await.unwrap();
        assert!(catalog.cancel_balance(&ctx, bought.id).await.is_err());
    }
}
