//! Funding of bookings: eligibility of each payment source and the ledger
//! debits and refunds that go with it.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use utoipa::ToSchema;

use crate::clock::ClubTime;
use crate::error::BookingError;
use crate::ledger::{
    BalanceStatus, ClassPackLedger, LedgerError, RefundOutcome, SubscriptionLedger,
};
use crate::models::{
    BalanceId, BookingId, Funding, GymClass, MemberId, MembershipDebit, Money,
    OrderId, PaymentSource, SubscriptionId, TenantContext,
};

/// Payment source requested by the caller together with its references.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct PaymentChoice {
    pub source: PaymentSource,
    pub class_pack_balance_id: Option<BalanceId>,
    pub order_id: Option<OrderId>,
}

impl PaymentChoice {
    pub fn membership() -> Self {
        Self::of(PaymentSource::MembershipIncluded)
    }

    pub fn class_pack(balance_id: BalanceId) -> Self {
        Self {
            class_pack_balance_id: Some(balance_id),
            ..Self::of(PaymentSource::ClassPack)
        }
    }

    pub fn pay_per_entry(order_id: OrderId) -> Self {
        Self {
            order_id: Some(order_id),
            ..Self::of(PaymentSource::PayPerEntry)
        }
    }

    pub fn complimentary() -> Self {
        Self::of(PaymentSource::Complimentary)
    }

    fn of(source: PaymentSource) -> Self {
        Self {
            source,
            class_pack_balance_id: None,
            order_id: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct MembershipOption {
    pub subscription_id: SubscriptionId,
    /// `None` for unlimited plans.
    pub classes_remaining: Option<u32>,
    pub available: bool,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ClassPackOption {
    pub balance_id: BalanceId,
    pub pack_name: String,
    pub classes_remaining: u32,
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct PayPerEntryOption {
    pub price: Money,
    pub price_with_tax: Money,
    pub tax_rate_bps: u32,
}

#[derive(Debug, Clone, Default, Serialize, ToSchema)]
pub struct PaymentOptions {
    pub membership_option: Option<MembershipOption>,
    pub class_pack_options: Vec<ClassPackOption>,
    pub pay_per_entry_option: Option<PayPerEntryOption>,
}

impl PaymentOptions {
    pub fn is_empty(&self) -> bool {
        self.membership_option.as_ref().is_none_or(|option| !option.available)
            && self.class_pack_options.is_empty()
            && self.pay_per_entry_option.is_none()
    }
}

fn rejected(message: impl Into<String>) -> BookingError {
    BookingError::Validation(message.into())
}

#[derive(Clone)]
pub struct PaymentSourceResolver {
    subscriptions: Arc<dyn SubscriptionLedger>,
    packs: Arc<dyn ClassPackLedger>,
    time: ClubTime,
}

impl PaymentSourceResolver {
    pub fn new(
        subscriptions: Arc<dyn SubscriptionLedger>,
        packs: Arc<dyn ClassPackLedger>,
        time: ClubTime,
    ) -> Self {
        Self {
            subscriptions,
            packs,
            time,
        }
    }

    /// Checks that `choice` may fund a booking of `gym_class` by `member_id`.
    /// Nothing is debited here.
    pub async fn resolve(
        &self,
        ctx: &TenantContext,
        member_id: MemberId,
        gym_class: &GymClass,
        choice: &PaymentChoice,
    ) -> Result<Funding, BookingError> {
        let mut funding = Funding {
            source: choice.source,
            ..Funding::complimentary()
        };

        match choice.source {
            PaymentSource::MembershipIncluded => {
                if !gym_class.accepts_membership_credits() {
                    return Err(rejected(format!(
                        "{} does not accept membership credits",
                        gym_class.name
                    )));
                }
                let subscription = self
                    .subscriptions
                    .find_active_by_member(member_id, self.time.today())
                    .await?
                    .filter(|subscription| ctx.owns(subscription.tenant_id))
                    .ok_or_else(|| rejected("member has no active subscription"))?;
                if gym_class.deducts_class_from_plan && !subscription.has_classes_available() {
                    return Err(rejected(format!(
                        "subscription {} has no classes remaining",
                        subscription.id
                    )));
                }
                funding.subscription_id = Some(subscription.id);
            }
            PaymentSource::ClassPack => {
                if !gym_class.accepts_class_pack_credits() {
                    return Err(rejected(format!(
                        "{} does not accept class pack credits",
                        gym_class.name
                    )));
                }
                let balance_id = choice
                    .class_pack_balance_id
                    .ok_or_else(|| rejected("a class pack balance is required"))?;
                let balance = ctx.scope(
                    self.packs.find_balance(balance_id).await?,
                    "class pack balance",
                    balance_id,
                )?;
                if balance.member_id != member_id {
                    return Err(rejected(format!(
                        "class pack balance {balance_id} belongs to another member"
                    )));
                }
                let pack = self
                    .packs
                    .pack(balance.class_pack_id)
                    .await?
                    .ok_or_else(|| BookingError::not_found("class pack", balance.class_pack_id))?;
                if !pack.is_valid_for_class(gym_class) {
                    return Err(rejected(format!(
                        "class pack {} cannot be used for {}",
                        pack.name, gym_class.name
                    )));
                }
                let now = self.time.now_utc();
                if balance.status == BalanceStatus::Cancelled {
                    return Err(rejected(format!("class pack balance {balance_id} is cancelled")));
                }
                if balance.is_expired(now) {
                    return Err(rejected(format!("class pack balance {balance_id} has expired")));
                }
                if !balance.can_use_credit(now) {
                    return Err(rejected(format!(
                        "insufficient class pack credits: balance {balance_id} has {} classes remaining",
                        balance.classes_remaining
                    )));
                }
                funding.class_pack_balance_id = Some(balance_id);
            }
            PaymentSource::PayPerEntry => {
                if !gym_class.accepts_pay_per_entry() {
                    return Err(rejected(format!(
                        "{} does not accept pay-per-entry",
                        gym_class.name
                    )));
                }
                let price = gym_class
                    .drop_in_price_with_tax()?
                    .ok_or_else(|| rejected(format!("{} has no drop-in price", gym_class.name)))?;
                let order_id = choice
                    .order_id
                    .ok_or_else(|| rejected("pay-per-entry requires a paid order"))?;
                funding.order_id = Some(order_id);
                funding.paid_amount = Some(price);
            }
            PaymentSource::Complimentary => {}
        }

        Ok(funding)
    }

    /// Consumes the credit behind `funding` when the source is debited at
    /// booking time. Sets `class_deducted` on success.
    pub async fn debit(
        &self,
        funding: &mut Funding,
        gym_class: &GymClass,
    ) -> Result<(), BookingError> {
        match (funding.source, funding.class_pack_balance_id, funding.subscription_id) {
            (PaymentSource::ClassPack, Some(balance_id), _) => {
                self.packs.use_class(balance_id, self.time.now_utc()).await?;
                funding.class_deducted = true;
            }
            (PaymentSource::MembershipIncluded, _, Some(subscription_id))
                if gym_class.deducts_class_from_plan
                    && gym_class.membership_debit == MembershipDebit::AtBooking =>
            {
                self.subscriptions.use_class(subscription_id).await?;
                funding.class_deducted = true;
            }
            _ => {}
        }
        Ok(())
    }

    /// Debit deferred to check-in for membership-funded bookings. The
    /// subscription must still be active; an exhausted plan does not block
    /// attendance.
    pub async fn debit_at_check_in(
        &self,
        funding: &mut Funding,
        gym_class: &GymClass,
        booking_id: BookingId,
    ) -> Result<(), BookingError> {
        let Some(subscription_id) = funding.subscription_id else {
            return Ok(());
        };
        if funding.source != PaymentSource::MembershipIncluded
            || funding.class_deducted
            || !gym_class.deducts_class_from_plan
        {
            return Ok(());
        }
        let active = self
            .subscriptions
            .subscription(subscription_id)
            .await?
            .is_some_and(|subscription| subscription.is_active(self.time.today()));
        if !active {
            return Err(rejected("member has no active subscription"));
        }
        match self.subscriptions.use_class(subscription_id).await {
            Ok(_) => {
                funding.class_deducted = true;
                Ok(())
            }
            Err(LedgerError::NoClassesRemaining(_)) => {
                warn!(%booking_id, %subscription_id, "Check-in without remaining plan classes");
                Ok(())
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Returns the credit consumed for a booking. Returns whether a credit
    /// actually went back to the member.
    pub async fn refund(&self, funding: &Funding, booking_id: BookingId) -> Result<bool, BookingError> {
        if !funding.class_deducted {
            return Ok(false);
        }
        match (funding.source, funding.class_pack_balance_id, funding.subscription_id) {
            (PaymentSource::ClassPack, Some(balance_id), _) => {
                match self.packs.refund_class(balance_id).await? {
                    RefundOutcome::Restored { remaining } => {
                        info!(%booking_id, %balance_id, remaining, "Class pack credit returned");
                        Ok(true)
                    }
                    RefundOutcome::Forfeited => {
                        warn!(%booking_id, %balance_id, "Refund forfeited on cancelled balance");
                        Ok(false)
                    }
                }
            }
            (PaymentSource::MembershipIncluded, _, Some(subscription_id)) => {
                self.subscriptions.refund_class(subscription_id).await?;
                info!(%booking_id, %subscription_id, "Membership class returned");
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// Every payment source the member could use for `gym_class` right now.
    pub async fn options(
        &self,
        ctx: &TenantContext,
        member_id: MemberId,
        gym_class: &GymClass,
    ) -> Result<PaymentOptions, BookingError> {
        let mut options = PaymentOptions::default();

        if gym_class.accepts_membership_credits()
            && let Some(subscription) = self
                .subscriptions
                .find_active_by_member(member_id, self.time.today())
                .await?
                .filter(|subscription| ctx.owns(subscription.tenant_id))
        {
            options.membership_option = Some(MembershipOption {
                subscription_id: subscription.id,
                classes_remaining: subscription.classes_remaining,
                available: !gym_class.deducts_class_from_plan
                    || subscription.has_classes_available(),
            });
        }

        if gym_class.accepts_class_pack_credits() {
            let balances = self
                .packs
                .find_active_by_member(member_id, self.time.now_utc())
                .await?;
            for balance in balances.into_iter().filter(|b| ctx.owns(b.tenant_id)) {
                let Some(pack) = self.packs.pack(balance.class_pack_id).await? else {
                    continue;
                };
                if pack.is_valid_for_class(gym_class) {
                    options.class_pack_options.push(ClassPackOption {
                        balance_id: balance.id,
                        pack_name: pack.name,
                        classes_remaining: balance.classes_remaining,
                        expires_at: balance.expires_at,
                    });
                }
            }
        }

        if gym_class.accepts_pay_per_entry()
            && let Some(price) = gym_class.drop_in_price.clone()
        {
            options.pay_per_entry_option = Some(PayPerEntryOption {
                price_with_tax: price.with_tax(gym_class.tax_rate_bps)?,
                price,
                tax_rate_bps: gym_class.tax_rate_bps,
            });
        }
        Ok(options)
    }
}
